//! One Wayland output (spec §3, §4.5).
//!
//! Grounded on `original_source/src/output.c` for field semantics
//! (`is_headless` name-prefix detection, the `wlr_output_power`
//! acquire/release/failed state machine) and on the teacher's
//! `wayland::output::Output` for the Rust-side shape of an output record.
//! Wire marshalling (the actual `wl_output`/`zxdg_output_v1`/
//! `zwlr_output_power_v1` protocol objects) is an external collaborator
//! (spec §1); this module only tracks the bookkeeping those callbacks would
//! feed, identified by an opaque protocol id.

use std::cell::RefCell;
use std::rc::Rc;

use crate::geometry::Transform;
use crate::image_source::{ImageSource, ObservableBase, PowerOnRequest, PowerState};

#[derive(Debug)]
struct OutputInner {
    id: u32,
    width: u32,
    height: u32,
    x: i32,
    y: i32,
    transform: Transform,
    make: String,
    model: String,
    name: String,
    description: String,
    power: PowerState,
    /// Whether a `zwlr_output_power_v1` object is currently held for this
    /// output (spec §4.5 "acquire_power_on ... returns 1 if already powered
    /// on"). Tracks presence of the power object, not the power state
    /// itself — `power` can be `Unknown` while this is still `true` if the
    /// compositor hasn't reported a mode yet.
    power_object_held: bool,
    is_headless: bool,
}

/// A cheap-to-clone handle onto one output record. Owned by the
/// [`OutputRegistry`]; other components (the desktop aggregator) hold it by
/// `Weak` reference, per the design-notes' "owning direction: wayland ->
/// output" rule.
///
/// The observables live in their own `Rc` rather than inside
/// `RefCell<OutputInner>`: `Subject<T>` is already internally mutable
/// (spec'd to be reachable from anywhere without a borrow), and keeping it
/// outside the `RefCell` lets [`ImageSource::observables`] hand back a
/// plain `&ObservableBase` instead of fighting the borrow checker over a
/// `Ref` guard with nowhere to live.
#[derive(Debug, Clone)]
pub struct Output {
    inner: Rc<RefCell<OutputInner>>,
    observables: Rc<ObservableBase>,
}

impl Output {
    /// Create a record for a newly announced `wl_output` global.
    pub fn new(id: u32) -> Self {
        Output {
            inner: Rc::new(RefCell::new(OutputInner {
                id,
                width: 0,
                height: 0,
                x: 0,
                y: 0,
                transform: Transform::Normal,
                make: String::new(),
                model: String::new(),
                name: String::new(),
                description: String::new(),
                power: PowerState::Unknown,
                power_object_held: false,
                is_headless: false,
            })),
            observables: Rc::new(ObservableBase::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.borrow().id
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn description(&self) -> String {
        self.inner.borrow().description.clone()
    }

    pub fn make(&self) -> String {
        self.inner.borrow().make.clone()
    }

    pub fn model(&self) -> String {
        self.inner.borrow().model.clone()
    }

    pub fn x(&self) -> i32 {
        self.inner.borrow().x
    }

    pub fn y(&self) -> i32 {
        self.inner.borrow().y
    }

    pub fn is_headless(&self) -> bool {
        self.inner.borrow().is_headless
    }

    /// `wl_output::geometry` handler: records make/model/transform.
    pub fn set_geometry(&self, make: &str, model: &str, transform: Transform) {
        let mut inner = self.inner.borrow_mut();
        inner.make = make.to_string();
        inner.model = model.to_string();
        inner.transform = transform;
        drop(inner);
        self.observables().geometry_change.notify(&());
    }

    /// `wl_output::mode` handler, current-mode events only.
    pub fn set_mode(&self, width: u32, height: u32) {
        let mut inner = self.inner.borrow_mut();
        inner.width = width;
        inner.height = height;
        drop(inner);
        self.observables().geometry_change.notify(&());
    }

    /// `zxdg_output_v1::logical_position` handler.
    pub fn set_logical_position(&self, x: i32, y: i32) {
        let mut inner = self.inner.borrow_mut();
        inner.x = x;
        inner.y = y;
        drop(inner);
        self.observables().geometry_change.notify(&());
    }

    /// `zxdg_output_v1::name` handler. `HEADLESS-`/`NOOP-` prefixes mark a
    /// virtual output with no physical display, per
    /// `original_source/src/output.c`'s `output_name`.
    pub fn set_name(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.name = name.to_string();
        inner.is_headless = name.starts_with("HEADLESS-") || name.starts_with("NOOP-");
    }

    /// `zxdg_output_v1::description` handler.
    pub fn set_description(&self, description: &str) {
        self.inner.borrow_mut().description = description.to_string();
    }

    /// `zwlr_output_power_v1::mode` handler: only notifies on an actual
    /// change, matching the C original's `if (old != self->power)` guard.
    pub fn set_power_state(&self, state: PowerState) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let changed = inner.power != state;
            inner.power = state;
            changed
        };
        if changed {
            self.observables().power_change.notify(&());
        }
    }

    /// `zwlr_output_power_v1::failed` handler: the power object is
    /// considered gone and the output reverts to `Unknown`.
    pub fn handle_power_failed(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.power = PowerState::Unknown;
        inner.power_object_held = false;
    }
}

impl ImageSource for Output {
    fn dimensions(&self) -> (u32, u32) {
        let inner = self.inner.borrow();
        (inner.width, inner.height)
    }

    fn transform(&self) -> Transform {
        self.inner.borrow().transform
    }

    fn power_state(&self) -> PowerState {
        self.inner.borrow().power
    }

    fn describe(&self) -> String {
        format!("output {}", self.inner.borrow().name)
    }

    /// Spec §4.5: returns `AlreadyOn` if a power object is already held;
    /// `ExtensionAbsent` if the caller reports no manager global; otherwise
    /// records that a request was issued and reports `Requested`. The
    /// actual `set_mode(ON)` wire call belongs to the external protocol
    /// binding collaborator; this only updates bookkeeping so a second call
    /// is idempotent.
    fn acquire_power_on(&self) -> PowerOnRequest {
        let mut inner = self.inner.borrow_mut();
        if inner.power_object_held {
            return PowerOnRequest::AlreadyOn;
        }
        inner.power_object_held = true;
        PowerOnRequest::Requested
    }

    fn release_power_on(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.power_object_held {
            return;
        }
        inner.power_object_held = false;
        inner.power = PowerState::Unknown;
    }

    fn observables(&self) -> &ObservableBase {
        &self.observables
    }
}

/// Owns every live [`Output`], keyed by the compositor's `global` id (spec
/// §4.5). Mirrors `original_source/src/output.c`'s `wl_list`-based
/// find-by-id/find-by-name/cycle helpers.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    outputs: Vec<Output>,
    power_extension_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    Forward,
    Reverse,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_power_extension_available(&mut self, available: bool) {
        self.power_extension_available = available;
    }

    pub fn insert(&mut self, output: Output) {
        self.outputs.push(output);
    }

    pub fn remove_by_id(&mut self, id: u32) -> Option<Output> {
        let pos = self.outputs.iter().position(|o| o.id() == id)?;
        Some(self.outputs.remove(pos))
    }

    pub fn find_by_id(&self, id: u32) -> Option<Output> {
        self.outputs.iter().find(|o| o.id() == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Output> {
        self.outputs.iter().find(|o| o.name() == name).cloned()
    }

    pub fn first(&self) -> Option<Output> {
        self.outputs.first().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Forward/reverse-wrapping cycle from `current` (spec §4.6
    /// `output-cycle`). `None` current starts from the first/last output.
    pub fn cycle(&self, current: Option<&Output>, direction: CycleDirection) -> Option<Output> {
        if self.outputs.is_empty() {
            return None;
        }
        let current_pos = current.and_then(|c| self.outputs.iter().position(|o| o.id() == c.id()));

        let next_pos = match (current_pos, direction) {
            (None, CycleDirection::Forward) => 0,
            (None, CycleDirection::Reverse) => self.outputs.len() - 1,
            (Some(pos), CycleDirection::Forward) => (pos + 1) % self.outputs.len(),
            (Some(pos), CycleDirection::Reverse) => (pos + self.outputs.len() - 1) % self.outputs.len(),
        };
        self.outputs.get(next_pos).cloned()
    }

    /// Spec §4.5 `acquire_power_on`: -1 if no power-management global is
    /// bound at all, delegating to the output's own bookkeeping otherwise.
    pub fn acquire_power_on(&self, output: &Output) -> PowerOnRequest {
        if !self.power_extension_available {
            return PowerOnRequest::ExtensionAbsent;
        }
        output.acquire_power_on()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn headless_name_prefix_is_detected() {
        let output = Output::new(1);
        output.set_name("HEADLESS-1");
        assert!(output.is_headless());

        let output = Output::new(2);
        output.set_name("eDP-1");
        assert!(!output.is_headless());
    }

    #[test]
    fn power_state_change_notifies_only_on_actual_change() {
        let output = Output::new(1);
        let notifications = Rc::new(Cell::new(0));
        let n = notifications.clone();
        let _observer = output.observables().power_change.observe(move |_| n.set(n.get() + 1));

        output.set_power_state(PowerState::On);
        output.set_power_state(PowerState::On);
        output.set_power_state(PowerState::Off);

        assert_eq!(notifications.get(), 2);
    }

    #[test]
    fn acquire_power_on_without_extension_is_absent() {
        let mut registry = OutputRegistry::new();
        let output = Output::new(1);
        registry.insert(output.clone());
        assert_eq!(registry.acquire_power_on(&output), PowerOnRequest::ExtensionAbsent);
    }

    #[test]
    fn acquire_power_on_is_idempotent() {
        let mut registry = OutputRegistry::new();
        registry.set_power_extension_available(true);
        let output = Output::new(1);
        registry.insert(output.clone());

        assert_eq!(registry.acquire_power_on(&output), PowerOnRequest::Requested);
        assert_eq!(registry.acquire_power_on(&output), PowerOnRequest::AlreadyOn);
    }

    #[test]
    fn cycle_wraps_forward_and_reverse() {
        let mut registry = OutputRegistry::new();
        let a = Output::new(1);
        let b = Output::new(2);
        registry.insert(a.clone());
        registry.insert(b.clone());

        let next = registry.cycle(Some(&b), CycleDirection::Forward).unwrap();
        assert_eq!(next.id(), a.id());

        let prev = registry.cycle(Some(&a), CycleDirection::Reverse).unwrap();
        assert_eq!(prev.id(), b.id());
    }

    #[test]
    fn find_by_id_and_name() {
        let mut registry = OutputRegistry::new();
        let output = Output::new(7);
        output.set_name("DP-1");
        registry.insert(output);

        assert!(registry.find_by_id(7).is_some());
        assert!(registry.find_by_name("DP-1").is_some());
        assert!(registry.find_by_name("DP-2").is_none());
    }
}
