//! A general-purpose observer/subject mechanism.
//!
//! This is the glue the rest of the crate uses for inter-module
//! communication without introducing a shared event bus or locking: a
//! [`Subject`] exposes zero or more notification points, and interested
//! parties attach an [`Observer`] to be called back synchronously when one
//! fires.
//!
//! This plays the same role as `smithay`'s `utils::signaling::Signaler`, but
//! with different wire semantics, dictated by the observer-safety invariants
//! this crate needs: notifications are delivered in LIFO registration order,
//! and either side of the observer/subject pair may be torn down first — the
//! one that dies first severs the link so the other never dereferences a
//! dangling pointer. `Signaler` instead keeps observers alive independently
//! of their subject via a `SignalToken`, which is the wrong ownership shape
//! here: spec'd teardown order requires the subject to be able to reach in
//! and null out every attached observer's back-link.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

struct Node<T> {
    notify: RefCell<Box<dyn FnMut(&T)>>,
    subject: RefCell<Option<Weak<RefCell<Inner<T>>>>>,
    /// Set once this node has been detached (by either side). A notification
    /// snapshot may still hold an `Rc` to a detached node; this flag is how
    /// the dispatch loop recognizes that and skips it.
    detached: RefCell<bool>,
}

struct Inner<T> {
    // Insertion order. Notification walks this in reverse (LIFO).
    observers: Vec<Rc<Node<T>>>,
}

/// The observable side of the relationship. Owns the list of attached
/// observers and is responsible for severing their back-links on teardown.
pub struct Subject<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observer_count", &self.inner.borrow().observers.len())
            .finish()
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subject<T> {
    pub fn new() -> Self {
        Subject {
            inner: Rc::new(RefCell::new(Inner { observers: Vec::new() })),
        }
    }

    /// Attach a new observer, calling `notify` on every subsequent
    /// [`Subject::notify`]. The returned [`Observer`] must be kept alive for
    /// as long as the callback should remain registered; dropping it detaches
    /// automatically.
    pub fn observe<F>(&self, notify: F) -> Observer<T>
    where
        F: FnMut(&T) + 'static,
    {
        let node = Rc::new(Node {
            notify: RefCell::new(Box::new(notify)),
            subject: RefCell::new(Some(Rc::downgrade(&self.inner))),
            detached: RefCell::new(false),
        });
        self.inner.borrow_mut().observers.push(node.clone());
        Observer { node }
    }

    /// Notify every attached observer, most-recently-attached first. Safe
    /// against an observer detaching or dropping itself from within its own
    /// callback: the dispatch list is a snapshot of `Rc` clones taken before
    /// any callback runs, and each entry is checked against `detached`
    /// immediately before it is invoked.
    pub fn notify(&self, arg: &T) {
        let snapshot: Vec<Rc<Node<T>>> = self.inner.borrow().observers.iter().rev().cloned().collect();
        for node in snapshot {
            if *node.detached.borrow() {
                continue;
            }
            (node.notify.borrow_mut())(arg);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }
}

/// Detaches every remaining observer (nulling their back-link, so a later
/// drop of an [`Observer`] is a no-op) before the subject's storage goes
/// away. Called implicitly on `Drop`, but also exposed so owners that keep a
/// `Subject` behind an `Rc` can sever links deterministically at a specific
/// point, matching the C original's explicit `observable_deinit`.
impl<T> Subject<T> {
    pub fn deinit(&self) {
        for node in self.inner.borrow_mut().observers.drain(..) {
            *node.subject.borrow_mut() = None;
            *node.detached.borrow_mut() = true;
        }
    }
}

impl<T> Drop for Subject<T> {
    fn drop(&mut self) {
        self.deinit();
    }
}

/// A live attachment to a [`Subject`]. Dropping it detaches the callback;
/// this is the observer-dies-first half of the "first to die severs the
/// link" contract in the module docs above.
pub struct Observer<T> {
    node: Rc<Node<T>>,
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("attached", &!*self.node.detached.borrow())
            .finish()
    }
}

impl<T> Observer<T> {
    /// Detach early. Idempotent: calling this twice, or dropping after
    /// calling it, is a no-op.
    pub fn detach(&self) {
        if *self.node.detached.borrow() {
            return;
        }
        *self.node.detached.borrow_mut() = true;
        if let Some(subject) = self.node.subject.borrow_mut().take().and_then(|w| w.upgrade()) {
            subject
                .borrow_mut()
                .observers
                .retain(|o| !Rc::ptr_eq(o, &self.node));
        }
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delivers_to_all_observers() {
        let subject = Subject::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen1 = seen.clone();
        let _a = subject.observe(move |v| seen1.borrow_mut().push(("a", *v)));
        let seen2 = seen.clone();
        let _b = subject.observe(move |v| seen2.borrow_mut().push(("b", *v)));

        subject.notify(&42);

        // LIFO: most recently attached observer runs first.
        assert_eq!(*seen.borrow(), vec![("b", 42), ("a", 42)]);
    }

    #[test]
    fn dropped_observer_stops_receiving() {
        let subject = Subject::<u32>::new();
        let count = Rc::new(Cell::new(0));

        let count1 = count.clone();
        let observer = subject.observe(move |_| count1.set(count1.get() + 1));
        subject.notify(&1);
        drop(observer);
        subject.notify(&2);

        assert_eq!(count.get(), 1);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn observer_may_detach_itself_during_notify() {
        let subject = Rc::new(Subject::<u32>::new());
        let calls = Rc::new(Cell::new(0));

        // A self-referential observer that detaches itself on first call.
        let slot: Rc<RefCell<Option<Observer<u32>>>> = Rc::new(RefCell::new(None));
        let slot2 = slot.clone();
        let calls2 = calls.clone();
        let observer = subject.observe(move |_| {
            calls2.set(calls2.get() + 1);
            slot2.borrow_mut().take(); // drop self mid-callback
        });
        *slot.borrow_mut() = Some(observer);

        let calls3 = calls.clone();
        let _other = subject.observe(move |_| calls3.set(calls3.get() + 100));

        subject.notify(&0);
        // both observers still fire for this round (snapshot taken up front)
        assert_eq!(calls.get(), 101);

        subject.notify(&0);
        // self-detached observer no longer fires; the other one does
        assert_eq!(calls.get(), 201);
    }

    #[test]
    fn observable_deinit_makes_later_observer_drop_a_no_op() {
        let subject = Subject::<u32>::new();
        let observer = subject.observe(|_| {});
        subject.deinit();
        assert_eq!(subject.observer_count(), 0);
        drop(observer); // must not panic or double-remove
    }
}
