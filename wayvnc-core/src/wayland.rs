//! The Wayland registry context (spec §4.5, §9 "thread a context struct
//! through every component; avoid singletons except for the event-loop
//! accessor"). Grounded on `original_source/include/wayland.h` /
//! `src/wayland.c`: the `struct wayland` that owns the output/seat/toplevel
//! lists, the bound-protocol-manager bools, and the `destroyed`/
//! `output_added`/`output_removed`/`seat_added`/`seat_removed` observables.
//!
//! Binding the actual `wl_registry` globals and pumping `wl_display` events
//! is wire-protocol marshalling, an external collaborator (spec §1
//! Non-goals); this module only holds the bookkeeping those callbacks would
//! feed, reached by the caller passing in ids/names as it receives them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::image_source::{Output, OutputRegistry, Toplevel, ToplevelRegistry};
use crate::observer::{Observer, Subject};

bitflags::bitflags! {
    /// `enum wayland_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaylandFlags: u32 {
        const ENABLE_INPUT = 1 << 0;
        const ENABLE_TOPLEVEL_CAPTURE = 1 << 1;
        const ENABLE_TRANSIENT_SEAT = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Which `X_WAYLAND_PROTOCOLS` manager globals the compositor has
    /// advertised and we've bound, tracked here so capture/input backends
    /// can query availability without reaching into the registry binding
    /// code itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtocolAvailability: u32 {
        const EXT_IMAGE_COPY_CAPTURE = 1 << 0;
        const EXT_FOREIGN_TOPLEVEL_LIST = 1 << 1;
        const EXT_FOREIGN_TOPLEVEL_IMAGE_CAPTURE_SOURCE = 1 << 2;
        const EXT_OUTPUT_IMAGE_CAPTURE_SOURCE = 1 << 3;
        const EXT_TRANSIENT_SEAT = 1 << 4;
        const EXT_DATA_CONTROL = 1 << 5;
        const WLR_DATA_CONTROL = 1 << 6;
        const WLR_OUTPUT_POWER = 1 << 7;
        const WLR_SCREENCOPY = 1 << 8;
        const WLR_VIRTUAL_POINTER = 1 << 9;
        const VIRTUAL_KEYBOARD = 1 << 10;
        const XDG_OUTPUT = 1 << 11;
        const LINUX_DMABUF = 1 << 12;
        const WL_SHM = 1 << 13;
    }
}

#[derive(Debug, Clone, Default)]
struct SeatInner {
    id: u32,
    capabilities: u32,
    name: String,
}

/// A tracked `wl_seat` (spec §4.5 title; `original_source/src/seat.c`). No
/// [`crate::image_source::ImageSource`] impl — a seat is an input routing
/// target for the virtual-pointer/keyboard adaptors (out of scope, spec
/// §1), not something screencopy can capture.
#[derive(Debug, Clone)]
pub struct Seat {
    inner: Rc<RefCell<SeatInner>>,
}

impl Seat {
    pub fn new(id: u32) -> Self {
        Seat { inner: Rc::new(RefCell::new(SeatInner { id, capabilities: 0, name: String::new() })) }
    }

    pub fn id(&self) -> u32 {
        self.inner.borrow().id
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn capabilities(&self) -> u32 {
        self.inner.borrow().capabilities
    }

    /// `wl_seat::capabilities` handler.
    pub fn set_capabilities(&self, capabilities: u32) {
        self.inner.borrow_mut().capabilities = capabilities;
    }

    /// `wl_seat::name` handler.
    pub fn set_name(&self, name: &str) {
        self.inner.borrow_mut().name = name.to_string();
    }
}

/// Owns every live [`Seat`]. Mirrors `seat_find_by_name`/`seat_find_by_id`/
/// `seat_first`.
#[derive(Debug, Default)]
pub struct SeatRegistry {
    seats: Vec<Seat>,
}

impl SeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seat: Seat) {
        self.seats.push(seat);
    }

    pub fn remove_by_id(&mut self, id: u32) -> Option<Seat> {
        let pos = self.seats.iter().position(|s| s.id() == id)?;
        Some(self.seats.remove(pos))
    }

    pub fn find_by_id(&self, id: u32) -> Option<Seat> {
        self.seats.iter().find(|s| s.id() == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Seat> {
        self.seats.iter().find(|s| s.name() == name).cloned()
    }

    pub fn first(&self) -> Option<Seat> {
        self.seats.first().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}

/// The `struct wayland` equivalent: the one context threaded through every
/// component that needs to enumerate outputs/seats/toplevels or check which
/// protocol managers are bound, instead of each one reaching for a
/// process-wide global (spec §9 design note).
pub struct WaylandContext {
    flags: WaylandFlags,
    protocols: ProtocolAvailability,
    outputs: OutputRegistry,
    seats: SeatRegistry,
    toplevels: ToplevelRegistry,
    output_added: Subject<Output>,
    output_removed: Subject<u32>,
    seat_added: Subject<Seat>,
    seat_removed: Subject<u32>,
    destroyed: Subject<()>,
}

impl WaylandContext {
    pub fn new(flags: WaylandFlags) -> Self {
        WaylandContext {
            flags,
            protocols: ProtocolAvailability::empty(),
            outputs: OutputRegistry::new(),
            seats: SeatRegistry::new(),
            toplevels: ToplevelRegistry::new(),
            output_added: Subject::new(),
            output_removed: Subject::new(),
            seat_added: Subject::new(),
            seat_removed: Subject::new(),
            destroyed: Subject::new(),
        }
    }

    pub fn flags(&self) -> WaylandFlags {
        self.flags
    }

    pub fn has_protocol(&self, protocol: ProtocolAvailability) -> bool {
        self.protocols.contains(protocol)
    }

    /// `CHECK_BIND`: record that a manager global has been bound.
    pub fn mark_protocol_bound(&mut self, protocol: ProtocolAvailability) {
        self.protocols.insert(protocol);
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    pub fn seats(&self) -> &SeatRegistry {
        &self.seats
    }

    pub fn toplevels(&self) -> &ToplevelRegistry {
        &self.toplevels
    }

    pub fn toplevels_mut(&mut self) -> &mut ToplevelRegistry {
        &mut self.toplevels
    }

    pub fn output_added(&self) -> &Subject<Output> {
        &self.output_added
    }

    pub fn output_removed(&self) -> &Subject<u32> {
        &self.output_removed
    }

    pub fn seat_added(&self) -> &Subject<Seat> {
        &self.seat_added
    }

    pub fn seat_removed(&self) -> &Subject<u32> {
        &self.seat_removed
    }

    pub fn destroyed(&self) -> &Subject<()> {
        &self.destroyed
    }

    pub fn observe_destroyed(&self, callback: impl FnMut(&()) + 'static) -> Observer<()> {
        self.destroyed.observe(callback)
    }

    /// `registry_add`'s `wl_output_interface` branch: bind, register, and
    /// notify.
    pub fn add_output(&mut self, output: Output) {
        self.outputs.insert(output.clone());
        self.output_added.notify(&output);
    }

    /// `registry_remove`'s output branch.
    pub fn remove_output(&mut self, id: u32) {
        if self.outputs.remove_by_id(id).is_some() {
            self.output_removed.notify(&id);
        }
    }

    /// `registry_add_input`'s `wl_seat_interface` branch. Returns `false`
    /// without recording anything if input handling is disabled, matching
    /// `is_flag_set(self, WAYLAND_FLAG_ENABLE_INPUT)`.
    pub fn add_seat(&mut self, seat: Seat) -> bool {
        if !self.flags.contains(WaylandFlags::ENABLE_INPUT) {
            return false;
        }
        self.seats.insert(seat.clone());
        self.seat_added.notify(&seat);
        true
    }

    /// `registry_remove`'s seat branch.
    pub fn remove_seat(&mut self, id: u32) {
        if self.seats.remove_by_id(id).is_some() {
            self.seat_removed.notify(&id);
        }
    }

    /// `handle_toplevel_handle`: only recorded when toplevel capture is
    /// enabled, matching `registry_add_toplevel`'s gate.
    pub fn add_toplevel(&mut self, toplevel: Toplevel) -> bool {
        if !self.flags.contains(WaylandFlags::ENABLE_TOPLEVEL_CAPTURE) {
            return false;
        }
        self.toplevels.insert(toplevel);
        true
    }

    /// `wayland_destroy`'s cascade: notify `destroyed` first, then drop
    /// every tracked output/seat/toplevel. The bound-global teardown itself
    /// belongs to the external wire-protocol collaborator.
    pub fn destroy(&mut self) {
        self.destroyed.notify(&());
        self.outputs = OutputRegistry::new();
        self.seats = SeatRegistry::new();
        self.toplevels = ToplevelRegistry::new();
    }
}
