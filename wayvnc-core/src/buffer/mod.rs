//! Buffers, the buffer pool, and the process-wide buffer registry (spec §3,
//! §4.2).
//!
//! A [`Buffer`] is a rectangular pixel container backed either by shared
//! memory or a DMA-BUF. Buffers are created and owned by a [`BufferPool`];
//! while checked out, they are owned by whichever capture session or
//! publisher last called [`BufferPool::acquire`].
//!
//! This module's shape is grounded on the teacher's `wayland::shm::pool`
//! (mmap lifecycle) and `backend::allocator::{dmabuf, gbm}` (dmabuf
//! metadata shape: fourcc, modifier, offset/stride per plane), inverted from
//! "receive a buffer a client created" to "create a buffer to hand to the
//! compositor" — the direction screencopy capture requires.

mod dmabuf;
mod pool;
mod registry;
mod shm;

pub use dmabuf::{DmabufAllocator, DmabufHandle};
pub use pool::{BufferPool, PoolConfig, PoolError};
pub use registry::BufferRegistry;
pub use shm::{RustixShmAllocator, ShmAllocator, ShmHandle};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier};

use crate::geometry::Region;

/// Which allocator backed a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    Shm,
    Dmabuf,
}

/// Whether a buffer holds output pixels or a cursor image. Buffer-damage
/// broadcasts (§4.2 "Registry broadcast") are scoped to one domain so that a
/// cursor update does not mark every output buffer stale and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferDomain {
    Output,
    Cursor,
}

#[derive(Debug)]
enum Backing {
    Shm(ShmHandle),
    Dmabuf(DmabufHandle),
}

pub(crate) type BufferInnerHandle = RefCell<BufferInner>;

#[derive(Debug)]
pub(crate) struct BufferInner {
    buffer_type: BufferType,
    width: u32,
    height: u32,
    stride: u32,
    format: Fourcc,
    modifier: Modifier,
    y_inverted: bool,
    domain: BufferDomain,
    pts: Duration,
    hotspot: Option<(i32, i32)>,
    buffer_damage: Region,
    frame_damage: Region,
    backing: Backing,
}

/// A rectangular pixel container. See the module docs and spec §3 for the
/// full contract.
///
/// Cloning a `Buffer` is cheap (it's a reference-counted handle onto shared
/// state) but buffers are not meant to have more than one live handle at a
/// time outside of the registry's weak bookkeeping pointer — the pool hands
/// out exclusive custody on `acquire` and expects it back on `release`.
#[derive(Debug, Clone)]
pub struct Buffer {
    inner: Rc<RefCell<BufferInner>>,
}

impl Buffer {
    pub fn buffer_type(&self) -> BufferType {
        self.inner.borrow().buffer_type
    }

    pub fn width(&self) -> u32 {
        self.inner.borrow().width
    }

    pub fn height(&self) -> u32 {
        self.inner.borrow().height
    }

    pub fn stride(&self) -> u32 {
        self.inner.borrow().stride
    }

    pub fn format(&self) -> Fourcc {
        self.inner.borrow().format
    }

    pub fn modifier(&self) -> Modifier {
        self.inner.borrow().modifier
    }

    pub fn domain(&self) -> BufferDomain {
        self.inner.borrow().domain
    }

    pub fn y_inverted(&self) -> bool {
        self.inner.borrow().y_inverted
    }

    pub fn set_y_inverted(&self, value: bool) {
        self.inner.borrow_mut().y_inverted = value;
    }

    pub fn pts(&self) -> Duration {
        self.inner.borrow().pts
    }

    pub fn set_pts(&self, pts: Duration) {
        self.inner.borrow_mut().pts = pts;
    }

    pub fn hotspot(&self) -> Option<(i32, i32)> {
        self.inner.borrow().hotspot
    }

    pub fn set_hotspot(&self, hotspot: (i32, i32)) {
        self.inner.borrow_mut().hotspot = Some(hotspot);
    }

    /// Pixels this buffer has *not* yet received since its last full paint
    /// and must be re-requested on next capture.
    pub fn buffer_damage(&self) -> Region {
        self.inner.borrow().buffer_damage.clone()
    }

    pub fn union_buffer_damage(&self, region: &Region) {
        self.inner.borrow_mut().buffer_damage.union(region);
    }

    pub fn clear_buffer_damage(&self) {
        self.inner.borrow_mut().buffer_damage = Region::empty();
    }

    /// Pixels the compositor wrote in the current frame.
    pub fn frame_damage(&self) -> Region {
        self.inner.borrow().frame_damage.clone()
    }

    pub fn union_frame_damage(&self, region: &Region) {
        self.inner.borrow_mut().frame_damage.union(region);
    }

    pub fn clear_frame_damage(&self) {
        self.inner.borrow_mut().frame_damage = Region::empty();
    }

    /// `true` iff two buffers share the same backing allocation. Used by
    /// the registry to skip the buffer that just produced a frame when
    /// broadcasting "mark damaged everywhere".
    pub fn is_same_allocation(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read access to the mapped pixels, for the damage refinery and for
    /// tests. Maps a DMA-BUF lazily on first call, per spec §4.2.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, PoolError> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.backing {
            Backing::Shm(shm) => Ok(f(shm.as_slice())),
            Backing::Dmabuf(dmabuf) => {
                let slice = dmabuf.map()?;
                Ok(f(slice))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn poke_byte(&self, offset: usize, xor: u8) {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.backing {
            Backing::Shm(shm) => shm.as_mut_slice()[offset] ^= xor,
            Backing::Dmabuf(_) => panic!("poke_byte is only meaningful for shm test buffers"),
        }
    }
}
