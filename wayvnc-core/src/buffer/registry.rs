//! The process-wide buffer registry (spec §3, §4.2 "Registry broadcast").
//!
//! Every buffer a pool creates is tracked here for as long as it lives,
//! regardless of which pool currently owns it or whether it is checked out.
//! When a frame finishes on one buffer, the publisher calls
//! [`BufferRegistry::damage_all`] to mark every *other* live buffer of the
//! same domain as stale, so that when an older buffer is reacquired the
//! region that changed since is re-copied rather than silently stale.

use std::rc::{Rc, Weak};

use super::{Buffer, BufferDomain};
use crate::geometry::Region;

#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: Vec<Weak<super::BufferInnerHandle>>,
}

// Buffers are tracked by the `Rc<RefCell<BufferInner>>` they wrap, keyed
// only by pointer identity — the registry never inspects their fields
// directly, it only broadcasts damage into buffers it can still upgrade.
impl super::Buffer {
    pub(super) fn weak_handle(&self) -> Weak<super::BufferInnerHandle> {
        Rc::downgrade(&self.inner)
    }
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a newly created buffer.
    pub fn track(&mut self, buffer: &Buffer) {
        self.prune();
        self.buffers.push(buffer.weak_handle());
    }

    /// Union `region` into the *buffer-damage* of every tracked buffer of
    /// `domain`, except `source` (the buffer that just produced the frame —
    /// it has already had its own buffer-damage cleared by the caller).
    pub fn damage_all(&mut self, region: &Region, domain: BufferDomain, source: &Buffer) {
        if region.is_empty() {
            return;
        }
        self.prune();
        for weak in &self.buffers {
            let Some(inner) = weak.upgrade() else { continue };
            let other = Buffer { inner };
            if other.is_same_allocation(source) {
                continue;
            }
            if other.domain() == domain {
                other.union_buffer_damage(region);
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.buffers.iter().filter(|w| w.strong_count() > 0).count()
    }

    fn prune(&mut self) {
        self.buffers.retain(|w| w.strong_count() > 0);
    }
}
