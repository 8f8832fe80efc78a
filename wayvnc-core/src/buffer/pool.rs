//! The buffer pool (spec §4.2).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier};

use super::{Backing, Buffer, BufferDomain, BufferInner, BufferType, DmabufAllocator, ShmAllocator};
use crate::geometry::Region;

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("no free buffer and allocation failed due to insufficient memory")]
    OutOfMemory,
    #[error("the requested backend (shm or dmabuf) has no service available")]
    BackendUnavailable,
    #[error("pool has not been configured yet")]
    Unconfigured,
    #[error("configuration is unsatisfiable: {0}")]
    UnsatisfiableConfig(&'static str),
}

/// The tuple every free buffer in a pool must match (spec §3 "Pool config").
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub buffer_type: BufferType,
    pub width: u32,
    pub height: u32,
    /// Only meaningful for `Shm`; dmabuf match ignores stride (driver-chosen).
    pub stride: u32,
    pub format: Fourcc,
    /// Allowed modifiers, in descending preference order. Empty for shm.
    pub modifiers: Vec<Modifier>,
    pub dmabuf_device_node: Option<PathBuf>,
}

impl PoolConfig {
    pub fn shm(width: u32, height: u32, stride: u32, format: Fourcc) -> Self {
        PoolConfig {
            buffer_type: BufferType::Shm,
            width,
            height,
            stride,
            format,
            modifiers: Vec::new(),
            dmabuf_device_node: None,
        }
    }

    pub fn dmabuf(
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: Vec<Modifier>,
        device_node: Option<PathBuf>,
    ) -> Self {
        PoolConfig {
            buffer_type: BufferType::Dmabuf,
            width,
            height,
            stride: 0,
            format,
            modifiers,
            dmabuf_device_node: device_node,
        }
    }

    /// Whether `buffer` still matches this config (spec §4.2 "A buffer
    /// matches a config iff...").
    fn matches(&self, buffer: &Buffer) -> bool {
        if buffer.buffer_type() != self.buffer_type
            || buffer.width() != self.width
            || buffer.height() != self.height
            || buffer.format() != self.format
        {
            return false;
        }
        match self.buffer_type {
            BufferType::Shm => buffer.stride() == self.stride,
            BufferType::Dmabuf => true,
        }
    }
}

/// An insertion-ordered collection of free buffers plus a configuration.
pub struct BufferPool {
    config: Option<PoolConfig>,
    free: VecDeque<Buffer>,
    shm: Rc<dyn ShmAllocator>,
    dmabuf: Option<Rc<dyn DmabufAllocator>>,
    created_count: usize,
}

impl BufferPool {
    pub fn new(
        shm: Rc<dyn ShmAllocator>,
        dmabuf: Option<Rc<dyn DmabufAllocator>>,
        initial_config: Option<PoolConfig>,
    ) -> Self {
        BufferPool {
            config: initial_config,
            free: VecDeque::new(),
            shm,
            dmabuf,
            created_count: 0,
        }
    }

    pub fn config(&self) -> Option<&PoolConfig> {
        self.config.as_ref()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Total number of buffers this pool has ever allocated (test hook for
    /// spec §8 S1's "exactly two have been created" assertion).
    pub fn created_count(&self) -> usize {
        self.created_count
    }

    /// Reconfigure the pool. If `new` differs from the current config,
    /// every free buffer is destroyed (buffers in flight are destroyed on
    /// release instead, since they no longer match). Returns `false` if the
    /// configuration is unsatisfiable.
    pub fn reconfig(&mut self, new: PoolConfig) -> Result<bool, PoolError> {
        if new.buffer_type == BufferType::Dmabuf && new.modifiers.is_empty() {
            return Ok(false);
        }
        if new.buffer_type == BufferType::Dmabuf && self.dmabuf.is_none() {
            return Err(PoolError::BackendUnavailable);
        }

        if self.config.as_ref() != Some(&new) {
            self.free.clear();
            self.config = Some(new);
        }
        Ok(true)
    }

    /// Pop a free buffer matching the config; if none, create one.
    pub fn acquire(&mut self) -> Result<Buffer, PoolError> {
        let config = self.config.clone().ok_or(PoolError::Unconfigured)?;

        if let Some(pos) = self.free.iter().position(|b| config.matches(b)) {
            // SAFETY of indexing: `pos` just came from `position` over the
            // same deque.
            return Ok(self.free.remove(pos).unwrap());
        }

        self.allocate(&config)
    }

    /// Clear the buffer's buffer-damage, unmap dmabuf buffers, and return it
    /// to the free list if it still matches the current config; otherwise
    /// drop it.
    pub fn release(&mut self, buffer: Buffer) {
        buffer.clear_buffer_damage();
        if buffer.buffer_type() == BufferType::Dmabuf {
            buffer.unmap_dmabuf();
        }

        let matches = self.config.as_ref().is_some_and(|c| c.matches(&buffer));
        if matches {
            self.free.push_back(buffer);
        }
        // else: buffer is simply dropped, destroying its backing.
    }

    fn allocate(&mut self, config: &PoolConfig) -> Result<Buffer, PoolError> {
        let backing = match config.buffer_type {
            BufferType::Shm => {
                let len = (config.height as usize) * (config.stride as usize);
                let handle = self.shm.allocate(len)?;
                Backing::Shm(handle)
            }
            BufferType::Dmabuf => {
                let dmabuf = self.dmabuf.as_ref().ok_or(PoolError::BackendUnavailable)?;
                let handle = dmabuf.allocate(config.width, config.height, config.format, &config.modifiers)?;
                Backing::Dmabuf(handle)
            }
        };

        let modifier = match &backing {
            Backing::Shm(_) => Modifier::Linear,
            Backing::Dmabuf(d) => d.modifier(),
        };
        let stride = match &backing {
            Backing::Shm(_) => config.stride,
            Backing::Dmabuf(d) => d.stride(),
        };

        let inner = BufferInner {
            buffer_type: config.buffer_type,
            width: config.width,
            height: config.height,
            stride,
            format: config.format,
            modifier,
            y_inverted: false,
            domain: BufferDomain::Output,
            pts: Duration::ZERO,
            hotspot: None,
            buffer_damage: Region::empty(),
            frame_damage: Region::empty(),
            backing,
        };

        self.created_count += 1;
        Ok(Buffer {
            inner: Rc::new(std::cell::RefCell::new(inner)),
        })
    }
}

// Kept free-standing (rather than a method on `Buffer`) since it reaches
// into backing-specific behavior the public `Buffer` API deliberately does
// not expose (matching the compositor-internal-only `unmap` operation in
// `original_source/src/buffer.c`).
impl Buffer {
    fn unmap_dmabuf(&self) {
        if let Backing::Dmabuf(handle) = &mut self.inner.borrow_mut().backing {
            handle.close_fd();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RustixShmAllocator;

    fn shm_pool() -> BufferPool {
        BufferPool::new(Rc::new(RustixShmAllocator), None, None)
    }

    fn config() -> PoolConfig {
        PoolConfig::shm(1920, 1080, 7680, Fourcc::Xrgb8888)
    }

    /// spec §8 S1.
    #[test]
    fn acquire_release_acquire_matches_peak_outstanding() {
        let mut pool = shm_pool();
        pool.reconfig(config()).unwrap();

        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        pool.release(a);
        let _c = pool.acquire().unwrap();

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.created_count(), 2);
    }

    /// spec §8 invariant 1: idle period returns everything to the free list.
    #[test]
    fn idle_period_returns_everything_to_free_list() {
        let mut pool = shm_pool();
        pool.reconfig(config()).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.created_count(), 2);
    }

    /// spec §8 invariant 2: reconfig clears the free list, so a later
    /// acquire never returns a buffer allocated under the old config.
    #[test]
    fn reconfig_prevents_reuse_of_old_buffers() {
        let mut pool = shm_pool();
        pool.reconfig(config()).unwrap();
        let old = pool.acquire().unwrap();
        pool.release(old.clone());
        assert_eq!(pool.free_count(), 1);

        pool.reconfig(PoolConfig::shm(1280, 720, 5120, Fourcc::Xrgb8888)).unwrap();
        assert_eq!(pool.free_count(), 0);

        let new = pool.acquire().unwrap();
        assert!(!new.is_same_allocation(&old));
        assert_eq!(new.width(), 1280);
    }

    #[test]
    fn dmabuf_config_without_modifiers_is_unsatisfiable() {
        let mut pool = shm_pool();
        let ok = pool
            .reconfig(PoolConfig::dmabuf(1920, 1080, Fourcc::Xrgb8888, Vec::new(), None))
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn acquire_before_reconfig_is_unconfigured() {
        let mut pool = shm_pool();
        assert!(matches!(pool.acquire(), Err(PoolError::Unconfigured)));
    }

    #[test]
    fn release_of_stale_buffer_is_destroyed_not_recycled() {
        let mut pool = shm_pool();
        pool.reconfig(config()).unwrap();
        let buffer = pool.acquire().unwrap();

        pool.reconfig(PoolConfig::shm(640, 480, 2560, Fourcc::Xrgb8888)).unwrap();
        pool.release(buffer);

        assert_eq!(pool.free_count(), 0);
    }
}
