//! C Bindings for RendezvousMemory
//!
//! `c_func_0` / `c_func_1` keep the fixed-layout contract of the handshake
//! fixture: the region starts at `addr` with the default stride, waits spin
//! forever, and a violated precondition stalls. Return codes are `0` on
//! success, `1` on payload mismatch and `-1` for a null or misaligned base.

use crate::handshake::{self, Side};
use crate::layout::{HandshakeRegion, RegionLayout};
use crate::wait::PollConfig;
use std::os::raw::c_int;

unsafe fn run_side(addr: *mut u32, side: Side) -> c_int {
    let region = match HandshakeRegion::from_base(addr.cast(), RegionLayout::default()) {
        Ok(region) => region,
        Err(e) => {
            tracing::warn!(%side, error = %e, "rejected handshake region");
            return -1;
        }
    };

    handshake::status_code(&handshake::run(&region, side, &PollConfig::spin()))
}

/// Side 0: publish MAP1 and wait for MAP2
///
/// # Safety
/// `addr` must point to three mapped, writable slots at 0x1000 stride that
/// stay mapped until the call returns.
#[no_mangle]
pub unsafe extern "C" fn c_func_0(addr: *mut u32) -> c_int {
    run_side(addr, Side::Initiator)
}

/// Side 1: wait for MAP1 and acknowledge with MAP2
///
/// # Safety
/// Same as [`c_func_0`].
#[no_mangle]
pub unsafe extern "C" fn c_func_1(addr: *mut u32) -> c_int {
    run_side(addr, Side::Responder)
}

/// Clear payload and flag so the region can run another round
///
/// # Safety
/// Same as [`c_func_0`].
#[no_mangle]
pub unsafe extern "C" fn rendezvous_reset(addr: *mut u32) -> c_int {
    match HandshakeRegion::from_base(addr.cast(), RegionLayout::default()) {
        Ok(region) => {
            region.reset();
            0
        }
        Err(_) => -1,
    }
}

/// Raw flag word of the region, or 0 for an invalid base
///
/// # Safety
/// Same as [`c_func_0`].
#[no_mangle]
pub unsafe extern "C" fn rendezvous_flag_state(addr: *const u32) -> u32 {
    match HandshakeRegion::from_base(addr as *mut u8, RegionLayout::default()) {
        Ok(region) => region.flag(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{MAP_MAGIC_1, MAP_MAGIC_2, PAGE_SIZE};
    use std::alloc::{alloc_zeroed, dealloc, Layout};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    /// Page-aligned zeroed block, freed on drop
    struct Pages {
        ptr: *mut u8,
        layout: Layout,
    }

    impl Pages {
        fn new(len: usize) -> Self {
            let layout = Layout::from_size_align(len, PAGE_SIZE).unwrap();
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout }
        }

        fn word(&self, offset: usize) -> &AtomicU32 {
            unsafe { &*(self.ptr.add(offset) as *const AtomicU32) }
        }
    }

    impl Drop for Pages {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }

    #[test]
    fn test_rejects_null_and_misaligned() {
        unsafe {
            assert_eq!(c_func_0(std::ptr::null_mut()), -1);
            assert_eq!(c_func_1(0x9000_0010 as *mut u32), -1);
            assert_eq!(rendezvous_reset(std::ptr::null_mut()), -1);
            assert_eq!(rendezvous_flag_state(std::ptr::null()), 0);
        }
    }

    #[test]
    fn test_c_functions_over_fixed_layout() {
        let pages = Pages::new(0x3000);
        let base = pages.ptr as usize;

        // Side 1 runs against the live region; side 0 is played by hand so
        // both sides do not share payload slots.
        let h1 = thread::spawn(move || unsafe { c_func_1(base as *mut u32) });

        let flag = pages.word(0x2000);
        while pages.word(0).load(Ordering::Acquire) != MAP_MAGIC_2 {
            std::hint::spin_loop();
        }
        flag.store(MAP_MAGIC_1, Ordering::Release);

        assert_eq!(h1.join().unwrap(), 0);
        assert_eq!(unsafe { rendezvous_flag_state(pages.ptr as *const u32) }, MAP_MAGIC_2);
        assert_eq!(pages.word(0x1000).load(Ordering::Relaxed), MAP_MAGIC_2 + 1);

        assert_eq!(unsafe { rendezvous_reset(pages.ptr as *mut u32) }, 0);
        assert_eq!(flag.load(Ordering::Relaxed), 0);
        assert_eq!(pages.word(0).load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_clobbered_payload_returns_one() {
        let pages = Pages::new(0x3000);
        let base = pages.ptr as usize;

        let h0 = thread::spawn(move || unsafe { c_func_0(base as *mut u32) });

        let flag = pages.word(0x2000);
        while flag.load(Ordering::Acquire) != MAP_MAGIC_1 {
            std::hint::spin_loop();
        }
        pages.word(0x1000).store(0xDEAD_BEEF, Ordering::Relaxed);
        flag.store(MAP_MAGIC_2, Ordering::Release);

        assert_eq!(h0.join().unwrap(), 1);
    }
}
