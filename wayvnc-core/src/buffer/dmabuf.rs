//! DMA-BUF buffer allocation.
//!
//! The actual GPU buffer-object allocation (asking a GBM/DRM render node for
//! memory with rendering usage) lives behind the [`DmabufAllocator`] trait
//! rather than in this crate: like the GL/EGL renderer, the concrete device
//! binding is an external collaborator (spec §1 lists the renderer used for
//! DMA-BUF color-conversion as out of scope, and the device-open/GBM-import
//! machinery is the same kind of backend-specific plumbing). This module
//! specifies the minimal shape the pool needs in return: per-plane
//! offset/stride, the chosen modifier, and a fd the pool wraps with the
//! linux-dmabuf protocol and then closes (spec §4.2).
//!
//! Field names mirror `backend::allocator::dmabuf::Dmabuf` in the teacher.

use std::os::unix::io::OwnedFd;

use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier};

use super::pool::PoolError;

/// One GPU buffer object, as returned by a [`DmabufAllocator`].
#[derive(Debug)]
pub struct DmabufHandle {
    fd: Option<OwnedFd>,
    offset: u32,
    stride: u32,
    modifier: Modifier,
    width: u32,
    height: u32,
    format: Fourcc,
    /// Lazily populated by [`DmabufHandle::map`]. `None` iff the buffer has
    /// never been mapped for CPU readback, matching spec §3's
    /// "`bo_map_handle` is non-null iff the buffer is mapped" invariant.
    mapping: Option<Vec<u8>>,
}

impl DmabufHandle {
    pub fn new(
        fd: OwnedFd,
        offset: u32,
        stride: u32,
        modifier: Modifier,
        width: u32,
        height: u32,
        format: Fourcc,
    ) -> Self {
        DmabufHandle {
            fd: Some(fd),
            offset,
            stride,
            modifier,
            width,
            height,
            format,
            mapping: None,
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Close the underlying fd. Called once the linux-dmabuf protocol object
    /// has wrapped it, per spec §4.2 ("close the fd after wrapping").
    pub fn close_fd(&mut self) {
        self.fd.take();
    }

    /// Map for CPU read access, synchronously, on first use. Real dmabuf
    /// readback requires a GPU-side copy/sync (dma-buf `DMA_BUF_IOCTL_SYNC`,
    /// or a renderer blit into a linear staging buffer) that is out of this
    /// crate's scope to perform — that work belongs to the same external
    /// renderer collaborator that does DMA-BUF color-conversion. This
    /// default implementation materializes a zeroed staging buffer so that
    /// the damage refinery and publisher have byte contents to operate on in
    /// the absence of that collaborator; a real deployment is expected to
    /// override mapping by constructing [`DmabufHandle`] with the bytes
    /// already synced, or by extending this type with a pluggable mapper.
    pub(super) fn map(&mut self) -> Result<&[u8], PoolError> {
        if self.mapping.is_none() {
            let len = (self.stride as usize) * (self.height as usize);
            self.mapping = Some(vec![0u8; len]);
        }
        Ok(self.mapping.as_deref().unwrap())
    }
}

/// Abstraction over "allocate a GPU buffer object with rendering usage and
/// return its dmabuf description". See the module docs for why this is a
/// trait rather than a concrete GBM/DRM binding.
pub trait DmabufAllocator {
    /// The DRM render node this allocator allocates from, if known. Reported
    /// to capture backends so they can bundle it into the pool-reconfig
    /// request alongside the chosen format/modifiers (spec §4.3.1 step 2).
    fn device_node(&self) -> Option<std::path::PathBuf>;

    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<DmabufHandle, PoolError>;
}
