//! Per-participant mapping of a handshake region
//!
//! Each participant reserves the full region as private anonymous memory,
//! then maps the named shared page over the flag slot with `MAP_FIXED`.
//! The payload slots stay private to the participant while the flag slot is
//! the same physical page for both.

use crate::error::{RendezvousError, Result};
use crate::layout::{HandshakeRegion, RegionLayout};
use crate::shm::SharedPage;
use rustix::mm::{mmap, mmap_anonymous, munmap, MapFlags, ProtFlags};
use std::ptr::NonNull;

/// A participant's view of the region: private payload, shared flag
pub struct PeerMapping {
    page: SharedPage,
    base: NonNull<u8>,
    layout: RegionLayout,
}

// SAFETY: all access to the mapping goes through atomics
unsafe impl Send for PeerMapping {}
unsafe impl Sync for PeerMapping {}

impl PeerMapping {
    /// Create the shared flag page and map it
    ///
    /// The caller owns the page: it is unlinked when this mapping drops.
    pub fn create(name: &str, layout: RegionLayout) -> Result<Self> {
        let page = SharedPage::create(name, layout.stride())?;
        Self::map(page, layout)
    }

    /// Map a flag page created by the peer
    pub fn open(name: &str, layout: RegionLayout) -> Result<Self> {
        let page = SharedPage::open(name, layout.stride())?;
        Self::map(page, layout)
    }

    fn map(page: SharedPage, layout: RegionLayout) -> Result<Self> {
        let total = layout.total_size();

        // Private, zero-filled payload slots
        let base = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                total,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
            .map_err(|e| RendezvousError::Mmap(e.into()))?
        };
        let base = NonNull::new(base.cast::<u8>())
            .ok_or_else(|| RendezvousError::Mmap(std::io::Error::other("mmap returned null")))?;

        // Shared flag slot on top of the reservation
        let flag_slot = unsafe { base.as_ptr().add(layout.flag_offset()) };
        let mapped = unsafe {
            mmap(
                flag_slot.cast(),
                layout.stride(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::FIXED,
                page.fd(),
                0,
            )
        };
        if let Err(e) = mapped {
            unsafe {
                let _ = munmap(base.as_ptr().cast(), total);
            }
            return Err(RendezvousError::Mmap(e.into()));
        }

        tracing::debug!(
            name = page.name(),
            base = format_args!("{:p}", base.as_ptr()),
            stride = layout.stride(),
            "peer mapping established"
        );

        Ok(Self { page, base, layout })
    }

    /// Typed view over this participant's region
    pub fn region(&self) -> HandshakeRegion<'_> {
        // SAFETY: base comes from mmap, so it is page aligned and covers
        // layout.total_size() bytes for as long as self
        unsafe { HandshakeRegion::from_base_unchecked(self.base.as_ptr(), self.layout) }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline(always)]
    pub fn layout(&self) -> RegionLayout {
        self.layout
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        self.page.name()
    }

    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.page.is_owner()
    }
}

impl Drop for PeerMapping {
    fn drop(&mut self) {
        // Covers the fixed flag mapping as well; the page handle unmaps its
        // own view and unlinks afterwards.
        unsafe {
            let _ = munmap(self.base.as_ptr().cast(), self.layout.total_size());
        }
    }
}
