//! RendezvousMemory - two-party rendezvous over a polled shared flag word
//!
//! Two participants each write a two-word payload into private pages, meet
//! through a single shared flag word, then re-read their payload to check it
//! survived the round-trip.
//!
//! # Protocol
//!
//! - **Side 0 (Initiator)**: writes `MAP1`, `MAP1 + 1`, raises the flag to
//!   READY (`MAP1`), waits for ACKED (`MAP2`)
//! - **Side 1 (Responder)**: writes `MAP2`, `MAP2 + 1`, waits for READY,
//!   raises the flag to ACKED
//!
//! Waits spin with no timeout unless a [`PollConfig`] says otherwise.

pub mod error;
pub mod layout;
pub mod wait;
pub mod handshake;
pub mod shm;
pub mod mapping;
pub mod roles;
pub mod bindings;

pub use error::{RendezvousError, Result};
pub use handshake::{HandshakeConfig, HandshakeReport, Side, Stage};
pub use layout::{
    FlagState, HandshakeRegion, RegionLayout, MAP_ADDR, MAP_MAGIC_1, MAP_MAGIC_2, MAP_SIZE,
};
pub use mapping::PeerMapping;
pub use roles::{Initiator, Responder};
pub use wait::PollConfig;
