//! Region layout and the typed view over the three handshake words
//!
//! A handshake region is three page-aligned slots separated by a fixed
//! stride:
//!
//! ```text
//! base + 0 * stride   payload word A
//! base + 1 * stride   payload word B
//! base + 2 * stride   flag word
//! ```
//!
//! Only the flag slot is meant to be shared between the two sides. The
//! payload slots are private to each side; the handshake detects a mapping
//! that leaks them by re-reading the payload after the round-trip.

use crate::error::{RendezvousError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default base address of the region in the fixed-address harness
pub const MAP_ADDR: usize = 0x9000_0000;

/// Default stride between the three slots
pub const MAP_SIZE: usize = 0x1000;

/// Side 0 payload marker and READY flag value ("MAP1")
pub const MAP_MAGIC_1: u32 = 0x3150_414D;

/// Side 1 payload marker and ACKED flag value ("MAP2")
pub const MAP_MAGIC_2: u32 = 0x3250_414D;

/// Alignment required for the base address and the stride
pub const PAGE_SIZE: usize = 0x1000;

/// Number of slots in a region
const SLOTS: usize = 3;

/// Byte layout of a handshake region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionLayout {
    stride: usize,
}

impl RegionLayout {
    /// Create a layout with the given slot stride
    ///
    /// The stride must be a non-zero multiple of [`PAGE_SIZE`].
    pub fn new(stride: usize) -> Result<Self> {
        if stride == 0 || stride % PAGE_SIZE != 0 {
            return Err(RendezvousError::Misaligned {
                what: "stride",
                value: stride,
                align: PAGE_SIZE,
            });
        }
        Ok(Self { stride })
    }

    #[inline(always)]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Byte offset of payload word `word` (0 or 1)
    #[inline(always)]
    pub fn payload_offset(&self, word: usize) -> usize {
        debug_assert!(word < 2);
        word * self.stride
    }

    #[inline(always)]
    pub fn flag_offset(&self) -> usize {
        2 * self.stride
    }

    /// Total bytes covered by the region
    #[inline(always)]
    pub fn total_size(&self) -> usize {
        SLOTS * self.stride
    }
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self { stride: MAP_SIZE }
    }
}

/// Decoded value of the flag word
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagState {
    /// No side has signalled yet
    Empty,
    /// Side 0 has published its payload
    Ready,
    /// Side 1 has acknowledged
    Acked,
    /// Anything else, e.g. stale memory
    Unknown(u32),
}

impl FlagState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => FlagState::Empty,
            MAP_MAGIC_1 => FlagState::Ready,
            MAP_MAGIC_2 => FlagState::Acked,
            other => FlagState::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            FlagState::Empty => 0,
            FlagState::Ready => MAP_MAGIC_1,
            FlagState::Acked => MAP_MAGIC_2,
            FlagState::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagState::Empty => write!(f, "EMPTY"),
            FlagState::Ready => write!(f, "READY"),
            FlagState::Acked => write!(f, "ACKED"),
            FlagState::Unknown(raw) => write!(f, "UNKNOWN(0x{:08X})", raw),
        }
    }
}

/// Typed view over the two payload words and the flag word
///
/// The flag is published with `Release` and observed with `Acquire`, so a
/// side's payload stores happen-before the peer sees the flag move.
#[derive(Clone, Copy)]
pub struct HandshakeRegion<'a> {
    payload: [&'a AtomicU32; 2],
    flag: &'a AtomicU32,
}

impl<'a> HandshakeRegion<'a> {
    /// Build a view from three independent cells
    pub fn from_cells(a: &'a AtomicU32, b: &'a AtomicU32, flag: &'a AtomicU32) -> Self {
        Self {
            payload: [a, b],
            flag,
        }
    }

    /// Build a view over `layout.total_size()` bytes starting at `base`
    ///
    /// # Safety
    /// - `base` must be valid for reads and writes of `layout.total_size()`
    ///   bytes for the lifetime `'a`
    /// - the three words must only be accessed atomically while the view lives
    pub unsafe fn from_base(base: *mut u8, layout: RegionLayout) -> Result<Self> {
        if base.is_null() {
            return Err(RendezvousError::NullBase);
        }
        let addr = base as usize;
        if addr % PAGE_SIZE != 0 {
            return Err(RendezvousError::Misaligned {
                what: "base",
                value: addr,
                align: PAGE_SIZE,
            });
        }

        Ok(Self::from_base_unchecked(base, layout))
    }

    /// # Safety
    /// As [`HandshakeRegion::from_base`], and `base` must already be non-null
    /// and page aligned.
    pub(crate) unsafe fn from_base_unchecked(base: *mut u8, layout: RegionLayout) -> Self {
        let cell = |offset: usize| -> &'a AtomicU32 { &*(base.add(offset) as *const AtomicU32) };

        Self {
            payload: [cell(layout.payload_offset(0)), cell(layout.payload_offset(1))],
            flag: cell(layout.flag_offset()),
        }
    }

    /// Build a view over a mapping of known length
    ///
    /// # Safety
    /// Same as [`HandshakeRegion::from_base`], except the length is checked.
    pub unsafe fn from_raw_parts(base: *mut u8, len: usize, layout: RegionLayout) -> Result<Self> {
        if len < layout.total_size() {
            return Err(RendezvousError::RegionTooSmall {
                need: layout.total_size(),
                got: len,
            });
        }
        Self::from_base(base, layout)
    }

    /// Current value of payload word `word`
    #[inline]
    pub fn payload(&self, word: usize) -> u32 {
        self.payload[word].load(Ordering::Relaxed)
    }

    /// Write both payload words
    #[inline]
    pub fn store_payload(&self, words: [u32; 2]) {
        for (cell, value) in self.payload.iter().zip(words) {
            cell.store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn flag(&self) -> u32 {
        self.flag.load(Ordering::Acquire)
    }

    #[inline]
    pub fn flag_state(&self) -> FlagState {
        FlagState::from_raw(self.flag())
    }

    /// Publish a new flag value
    #[inline]
    pub fn raise(&self, state: FlagState) {
        self.flag.store(state.raw(), Ordering::Release);
    }

    /// Return the region to its pre-handshake state
    ///
    /// Zeroes this side's payload and stores EMPTY in the flag. A second
    /// round needs both sides reset (or fresh payload pages) first.
    pub fn reset(&self) {
        self.store_payload([0, 0]);
        self.raise(FlagState::Empty);
    }

    pub(crate) fn payload_cell(&self, word: usize) -> &'a AtomicU32 {
        self.payload[word]
    }

    pub(crate) fn flag_cell(&self) -> &'a AtomicU32 {
        self.flag
    }
}

impl fmt::Debug for HandshakeRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeRegion")
            .field("payload", &[self.payload(0), self.payload(1)])
            .field("flag", &self.flag_state())
            .finish()
    }
}
