//! Low-level POSIX shared memory operations

use crate::error::{RendezvousError, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::ftruncate;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

const RENDEZVOUS_SHM_PREFIX: &str = "/rendezvous_";
const MAX_NAME_LEN: usize = 255 - RENDEZVOUS_SHM_PREFIX.len();

/// Handle to a named shared memory object holding the flag page
pub struct SharedPage {
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping is only accessed through atomics
unsafe impl Send for SharedPage {}
unsafe impl Sync for SharedPage {}

fn object_name(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(RendezvousError::NamespaceTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }

    CString::new(format!("{}{}", RENDEZVOUS_SHM_PREFIX, name)).map_err(|_| {
        RendezvousError::InvalidName {
            name: name.to_string(),
        }
    })
}

fn map_shared(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| RendezvousError::Mmap(e.into()))?
    };

    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| RendezvousError::Mmap(std::io::Error::other("mmap returned null")))
}

impl SharedPage {
    /// Create (or take over) a shared memory object and zero it
    ///
    /// # Arguments
    /// * `name` - Unique name for the object (will be prefixed with "/rendezvous_")
    /// * `size` - Size in bytes
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = object_name(name)?;

        // Try to create exclusively first, fall back to open if exists
        let fd = match shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        ) {
            Ok(fd) => fd,
            Err(_) => {
                tracing::debug!(name, "shared page exists, reusing");
                shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
                    RendezvousError::ShmCreate {
                        name: name.to_string(),
                        source: e.into(),
                    }
                })?
            }
        };

        ftruncate(&fd, size as u64).map_err(|e| RendezvousError::Truncate(e.into()))?;

        let addr = map_shared(&fd, size)?;

        // A fresh round starts from an EMPTY flag
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Open an existing shared memory object
    ///
    /// Fails with `RegionTooSmall` if the creator has not sized it to at
    /// least `min_size` bytes yet.
    pub fn open(name: &str, min_size: usize) -> Result<Self> {
        let c_name = object_name(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            RendezvousError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| RendezvousError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;
        if size < min_size {
            return Err(RendezvousError::RegionTooSmall {
                need: min_size,
                got: size,
            });
        }

        let addr = map_shared(&fd, size)?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    /// The flag word at the start of the page
    #[inline(always)]
    pub fn flag(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned, at least 4 bytes, and lives as long as self
        unsafe { &*(self.addr.as_ptr() as *const AtomicU32) }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle unlinks the object on drop
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for SharedPage {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if let Ok(c_name) = object_name(&self.name) {
                let _ = shm_unlink(c_name.as_c_str());
            }
        }
    }
}
