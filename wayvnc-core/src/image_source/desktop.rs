//! The desktop aggregator image source (spec §3, §4.3.3, §4.5).
//!
//! Fans a single logical capture across every tracked output. Grounded on
//! `original_source/src/desktop.c`: geometry is the bounding box of all
//! outputs' logical position + size; power is the unanimous state of all
//! outputs, reported `Unknown` on any disagreement; exactly one
//! desktop-level `power_change` notification fires per transition into a
//! unanimous state (spec §8 S5), which falls out for free here because the
//! per-output `power_change` observer only fires on an actual per-output
//! state change (see [`Output::set_power_state`]) and this handler only
//! notifies when the resulting tally is unanimous.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::geometry::Transform;
use crate::image_source::output::Output;
use crate::image_source::{ImageSource, ObservableBase, PowerOnRequest, PowerState};
use crate::observer::{Observer, Subject};

/// An output joining or leaving a [`Desktop`], broadcast on
/// [`Desktop::output_lifecycle`] in addition to the generic geometry-change
/// notification `add_output`/`remove_output` already fire — the desktop
/// capture backend (spec §4.3.3) needs to know specifically *which* output
/// arrived or left to start or tear down its per-output sub-capture,
/// something a bare geometry-change notification can't distinguish from an
/// existing output merely resizing.
#[derive(Clone)]
pub enum OutputLifecycleEvent {
    Added(Output),
    Removed(u32),
}

struct DesktopOutputEntry {
    output: Output,
    _geometry_observer: Observer<()>,
    _power_observer: Observer<()>,
}

struct DesktopInner {
    outputs: Vec<DesktopOutputEntry>,
}

/// One output tracked by a [`Desktop`], exposed read-only for callers that
/// need to enumerate which outputs back the aggregate (e.g. the desktop
/// capture backend's per-output sub-capture fan-out, spec §4.3.3).
pub struct DesktopOutput<'a> {
    pub output: &'a Output,
}

/// Fan-out image source aggregating every output currently tracked.
///
/// `power_extension_available` mirrors the same flag `OutputRegistry` uses:
/// the original acquires power directly against the global manager rather
/// than going through the registry, so `Desktop` is handed the flag
/// directly at construction instead of holding a reference to the registry.
#[derive(Clone)]
pub struct Desktop {
    inner: Rc<RefCell<DesktopInner>>,
    observables: Rc<ObservableBase>,
    power_extension_available: Rc<std::cell::Cell<bool>>,
    output_lifecycle: Rc<Subject<OutputLifecycleEvent>>,
}

impl Desktop {
    pub fn new(power_extension_available: bool) -> Self {
        Desktop {
            inner: Rc::new(RefCell::new(DesktopInner { outputs: Vec::new() })),
            observables: Rc::new(ObservableBase::new()),
            power_extension_available: Rc::new(std::cell::Cell::new(power_extension_available)),
            output_lifecycle: Rc::new(Subject::new()),
        }
    }

    /// Subscribe to outputs joining/leaving, for the desktop capture
    /// backend to start/stop per-output sub-captures as they come and go.
    pub fn output_lifecycle(&self) -> &Subject<OutputLifecycleEvent> {
        &self.output_lifecycle
    }

    pub fn set_power_extension_available(&self, available: bool) {
        self.power_extension_available.set(available);
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.inner.borrow().outputs.iter().map(|e| e.output.clone()).collect()
    }

    pub fn output_count(&self) -> usize {
        self.inner.borrow().outputs.len()
    }

    /// Start tracking a new output (spec §4.5 "on a compositor `global` for
    /// `wl_output`..."; here, whatever owns the output/desktop wiring calls
    /// this once an `Output` has been created). Installs geometry/power
    /// observers and fires one geometry-change notification, matching
    /// `desktop_image_source_output_added`.
    pub fn add_output(&self, output: Output) {
        let geometry_observables = self.observables.clone();
        let geometry_observer = output.observables().geometry_change.observe(move |_| {
            geometry_observables.geometry_change.notify(&());
        });

        let power_inner = Rc::downgrade(&self.inner);
        let power_observables = self.observables.clone();
        let power_observer = output.observables().power_change.observe(move |_| {
            notify_if_unanimous(&power_inner, &power_observables);
        });

        self.inner.borrow_mut().outputs.push(DesktopOutputEntry {
            output: output.clone(),
            _geometry_observer: geometry_observer,
            _power_observer: power_observer,
        });

        self.observables.geometry_change.notify(&());
        self.output_lifecycle.notify(&OutputLifecycleEvent::Added(output));
    }

    /// Stop tracking an output (spec §4.5 `global_remove`), dropping its
    /// observers and firing a geometry-change notification.
    pub fn remove_output(&self, id: u32) {
        let mut inner = self.inner.borrow_mut();
        let Some(pos) = inner.outputs.iter().position(|e| e.output.id() == id) else {
            return;
        };
        inner.outputs.remove(pos);
        drop(inner);
        self.observables.geometry_change.notify(&());
        self.output_lifecycle.notify(&OutputLifecycleEvent::Removed(id));
    }
}

fn notify_if_unanimous(inner: &Weak<RefCell<DesktopInner>>, observables: &Rc<ObservableBase>) {
    let Some(inner) = inner.upgrade() else { return };
    let inner = inner.borrow();
    let total = inner.outputs.len();
    if total == 0 {
        return;
    }
    let (mut n_on, mut n_off) = (0, 0);
    for entry in &inner.outputs {
        match entry.output.power_state() {
            PowerState::On => n_on += 1,
            PowerState::Off => n_off += 1,
            PowerState::Unknown => {}
        }
    }
    drop(inner);
    if n_on == total || n_off == total {
        observables.power_change.notify(&());
    }
}

impl ImageSource for Desktop {
    /// Bounding box: `width = max(x+width)`, `height = max(y+height)` over
    /// every tracked output (spec §4.3.3).
    fn dimensions(&self) -> (u32, u32) {
        let inner = self.inner.borrow();
        let mut width = 0i64;
        let mut height = 0i64;
        for entry in &inner.outputs {
            let (w, h) = entry.output.dimensions();
            width = width.max(entry.output.x() as i64 + w as i64);
            height = height.max(entry.output.y() as i64 + h as i64);
        }
        (width.max(0) as u32, height.max(0) as u32)
    }

    fn transform(&self) -> Transform {
        Transform::Normal
    }

    /// Unanimous state of all outputs; `Unknown` on any disagreement or if
    /// there are no outputs yet, matching
    /// `desktop_image_source_get_power_state`.
    fn power_state(&self) -> PowerState {
        let inner = self.inner.borrow();
        let mut outputs = inner.outputs.iter();
        let Some(first) = outputs.next() else {
            return PowerState::Unknown;
        };
        let state = first.output.power_state();
        for entry in outputs {
            if entry.output.power_state() != state {
                return PowerState::Unknown;
            }
        }
        state
    }

    fn describe(&self) -> String {
        "Desktop".to_string()
    }

    /// Requests power-on for every output; if any fails (no extension),
    /// releases everything already requested and reports the failure,
    /// matching `desktop_image_source_acquire_power_on`'s
    /// request-all-or-roll-back behavior.
    fn acquire_power_on(&self) -> PowerOnRequest {
        if !self.power_extension_available.get() {
            return PowerOnRequest::ExtensionAbsent;
        }

        let inner = self.inner.borrow();
        let mut any_requested = false;
        for entry in &inner.outputs {
            match entry.output.acquire_power_on() {
                PowerOnRequest::AlreadyOn => {}
                PowerOnRequest::Requested => any_requested = true,
                PowerOnRequest::ExtensionAbsent => {
                    for entry in &inner.outputs {
                        entry.output.release_power_on();
                    }
                    return PowerOnRequest::ExtensionAbsent;
                }
            }
        }
        if any_requested {
            PowerOnRequest::Requested
        } else {
            PowerOnRequest::AlreadyOn
        }
    }

    fn release_power_on(&self) {
        let inner = self.inner.borrow();
        for entry in &inner.outputs {
            entry.output.release_power_on();
        }
    }

    fn observables(&self) -> &ObservableBase {
        &self.observables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn geometry_is_bounding_box_of_outputs() {
        let desktop = Desktop::new(false);

        let a = Output::new(1);
        a.set_mode(1920, 1080);
        a.set_logical_position(0, 0);
        desktop.add_output(a);

        let b = Output::new(2);
        b.set_mode(1280, 720);
        b.set_logical_position(1920, 0);
        desktop.add_output(b);

        assert_eq!(desktop.dimensions(), (3200, 1080));
    }

    /// spec §8 S5.
    #[test]
    fn power_aggregation_matches_s5() {
        let desktop = Desktop::new(false);
        let a = Output::new(1);
        let b = Output::new(2);
        desktop.add_output(a.clone());
        desktop.add_output(b.clone());

        let notifications = Rc::new(Cell::new(0));
        let n = notifications.clone();
        let _observer = desktop.observables().power_change.observe(move |_| n.set(n.get() + 1));

        a.set_power_state(PowerState::On);
        b.set_power_state(PowerState::On);
        assert_eq!(desktop.power_state(), PowerState::On);
        assert_eq!(notifications.get(), 1);

        a.set_power_state(PowerState::Off);
        assert_eq!(desktop.power_state(), PowerState::Unknown);
        assert_eq!(notifications.get(), 1, "mixed state must not notify");

        b.set_power_state(PowerState::Off);
        assert_eq!(desktop.power_state(), PowerState::Off);
        assert_eq!(notifications.get(), 2, "reaching unanimous off notifies exactly once");
    }

    #[test]
    fn remove_output_updates_geometry() {
        let desktop = Desktop::new(false);
        let a = Output::new(1);
        a.set_mode(1920, 1080);
        desktop.add_output(a);
        assert_eq!(desktop.output_count(), 1);

        desktop.remove_output(1);
        assert_eq!(desktop.output_count(), 0);
        assert_eq!(desktop.dimensions(), (0, 0));
    }

    #[test]
    fn output_lifecycle_reports_add_and_remove() {
        let desktop = Desktop::new(false);
        let events: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

        let added = events.clone();
        let _observer = desktop.output_lifecycle().observe(move |event| match event {
            OutputLifecycleEvent::Added(output) => added.borrow_mut().push(output.id()),
            OutputLifecycleEvent::Removed(id) => added.borrow_mut().push(*id),
        });

        desktop.add_output(Output::new(7));
        desktop.remove_output(7);

        assert_eq!(*events.borrow(), vec![7, 7]);
    }

    #[test]
    fn acquire_power_on_rolls_back_without_extension() {
        let desktop = Desktop::new(false);
        desktop.add_output(Output::new(1));
        assert_eq!(desktop.acquire_power_on(), PowerOnRequest::ExtensionAbsent);
    }
}
