//! One foreign-toplevel handle (spec §3, §4.5).
//!
//! Grounded on `original_source/src/toplevel.c`: a toplevel's image-source
//! implementation only overrides `describe`; it has no independent
//! dimensions, transform or power state of its own (those come from
//! whichever output the window currently occupies, which this crate does
//! not track — screencopy addresses it by the compositor-chosen capture
//! source, not by geometry).

use std::cell::RefCell;
use std::rc::Rc;

use crate::geometry::Transform;
use crate::image_source::{ImageSource, ObservableBase, PowerOnRequest, PowerState};

#[derive(Debug)]
struct ToplevelInner {
    identifier: String,
    app_id: String,
    title: String,
    closed: bool,
}

/// A cheap-to-clone handle onto one foreign-toplevel record.
#[derive(Debug, Clone)]
pub struct Toplevel {
    inner: Rc<RefCell<ToplevelInner>>,
    observables: Rc<ObservableBase>,
}

impl Toplevel {
    pub fn new(identifier: impl Into<String>) -> Self {
        Toplevel {
            inner: Rc::new(RefCell::new(ToplevelInner {
                identifier: identifier.into(),
                app_id: String::new(),
                title: String::new(),
                closed: false,
            })),
            observables: Rc::new(ObservableBase::new()),
        }
    }

    pub fn identifier(&self) -> String {
        self.inner.borrow().identifier.clone()
    }

    pub fn app_id(&self) -> String {
        self.inner.borrow().app_id.clone()
    }

    pub fn title(&self) -> String {
        self.inner.borrow().title.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    pub fn set_title(&self, title: &str) {
        self.inner.borrow_mut().title = title.to_string();
    }

    pub fn set_app_id(&self, app_id: &str) {
        self.inner.borrow_mut().app_id = app_id.to_string();
    }

    /// `ext_foreign_toplevel_handle_v1::closed` handler. The registry's
    /// `on_closed` callback (spec §4.5 "fire a user callback and remove")
    /// is invoked by [`ToplevelRegistry::handle_closed`] after this flips
    /// the flag, not here, so a single event source (the registry) decides
    /// removal ordering.
    pub fn mark_closed(&self) {
        self.inner.borrow_mut().closed = true;
    }
}

impl ImageSource for Toplevel {
    fn dimensions(&self) -> (u32, u32) {
        (0, 0)
    }

    fn transform(&self) -> Transform {
        Transform::Normal
    }

    fn power_state(&self) -> PowerState {
        PowerState::Unknown
    }

    fn describe(&self) -> String {
        format!("Toplevel {}", self.inner.borrow().identifier)
    }

    fn acquire_power_on(&self) -> PowerOnRequest {
        PowerOnRequest::ExtensionAbsent
    }

    fn release_power_on(&self) {}

    fn observables(&self) -> &ObservableBase {
        &self.observables
    }
}

/// Owns every live [`Toplevel`] (spec §4.5: "on `ext_foreign_toplevel_list`
/// events, create a toplevel image source ... on `closed`, fire a user
/// callback and remove").
#[derive(Default)]
pub struct ToplevelRegistry {
    toplevels: Vec<Toplevel>,
    on_closed: Option<Box<dyn FnMut(&Toplevel)>>,
}

impl std::fmt::Debug for ToplevelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToplevelRegistry").field("count", &self.toplevels.len()).finish()
    }
}

impl ToplevelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_closed(&mut self, callback: impl FnMut(&Toplevel) + 'static) {
        self.on_closed = Some(Box::new(callback));
    }

    pub fn insert(&mut self, toplevel: Toplevel) {
        self.toplevels.push(toplevel);
    }

    pub fn find_by_identifier(&self, identifier: &str) -> Option<Toplevel> {
        self.toplevels.iter().find(|t| t.identifier() == identifier).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Toplevel> {
        self.toplevels.iter()
    }

    pub fn len(&self) -> usize {
        self.toplevels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toplevels.is_empty()
    }

    /// `closed` handler: fires the registered callback, then removes the
    /// toplevel from the list.
    pub fn handle_closed(&mut self, identifier: &str) {
        let Some(pos) = self.toplevels.iter().position(|t| t.identifier() == identifier) else {
            return;
        };
        self.toplevels[pos].mark_closed();
        if let Some(callback) = &mut self.on_closed {
            callback(&self.toplevels[pos]);
        }
        self.toplevels.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn handle_closed_fires_callback_and_removes() {
        let mut registry = ToplevelRegistry::new();
        registry.insert(Toplevel::new("wl-1"));

        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        registry.set_on_closed(move |t| seen2.borrow_mut().push(t.identifier()));

        registry.handle_closed("wl-1");

        assert_eq!(*seen.borrow(), vec!["wl-1".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn find_by_identifier_misses_gracefully() {
        let registry = ToplevelRegistry::new();
        assert!(registry.find_by_identifier("nope").is_none());
    }
}
