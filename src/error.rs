//! Error types for RendezvousMemory

use crate::handshake::Stage;
use std::io;
use thiserror::Error;

/// Result type for RendezvousMemory operations
pub type Result<T> = std::result::Result<T, RendezvousError>;

/// Errors that can occur in RendezvousMemory operations
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Namespace contains a NUL byte
    #[error("Invalid namespace {name:?}: contains a NUL byte")]
    InvalidName { name: String },

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Base address was null
    #[error("Region base address is null")]
    NullBase,

    /// Base address or stride not aligned to a page
    #[error("Region {what} 0x{value:X} is not aligned to 0x{align:X}")]
    Misaligned {
        what: &'static str,
        value: usize,
        align: usize,
    },

    /// Backing memory shorter than the layout needs
    #[error("Region too small: need {need} bytes, got {got} bytes")]
    RegionTooSmall { need: usize, got: usize },

    /// A payload word changed between write and read-back
    #[error("Payload word {word} corrupted: expected 0x{expected:08X}, got 0x{got:08X}")]
    PayloadMismatch { word: usize, expected: u32, got: u32 },

    /// A start-of-round precondition never became true
    #[error("Precondition stalled: {what} is 0x{got:08X}, expected 0")]
    PreconditionStalled { what: &'static str, got: u32 },

    /// Peer did not move the flag in time
    #[error("Timed out waiting for peer ({stage}): flag is 0x{last:08X}")]
    Timeout { stage: Stage, last: u32 },
}

impl RendezvousError {
    /// The peer has not created (or not yet sized) the shared page
    ///
    /// The only condition `Responder::connect_wait` keeps retrying on.
    pub fn is_peer_absent(&self) -> bool {
        match self {
            RendezvousError::ShmOpen { source, .. } => source.kind() == io::ErrorKind::NotFound,
            RendezvousError::RegionTooSmall { .. } => true,
            _ => false,
        }
    }

    /// Status code reported across the C ABI and by the CLI.
    ///
    /// `1` is the payload-mismatch code of `c_func_0`/`c_func_1`; everything
    /// else is a setup or liveness failure.
    pub fn status_code(&self) -> i32 {
        match self {
            RendezvousError::PayloadMismatch { .. } => 1,
            _ => 2,
        }
    }
}
