//! High-level participant API
//!
//! [`Initiator`] (side 0) owns the shared flag page; [`Responder`] (side 1)
//! connects to it. Each holds its own [`PeerMapping`], so payload pages are
//! private per participant.

use crate::error::Result;
use crate::handshake::{self, HandshakeConfig, HandshakeReport, Side};
use crate::layout::{FlagState, HandshakeRegion};
use crate::mapping::PeerMapping;
use std::thread;
use std::time::{Duration, Instant};

/// Retry period for `connect_wait` when no poll interval is configured
const CONNECT_RETRY: Duration = Duration::from_millis(10);

/// Side 0 of the rendezvous
pub struct Initiator {
    mapping: PeerMapping,
    config: HandshakeConfig,
}

impl Initiator {
    /// Create the rendezvous as side 0 (owner)
    pub fn create(namespace: &str, config: HandshakeConfig) -> Result<Self> {
        let mapping = PeerMapping::create(namespace, config.layout)?;
        Ok(Self { mapping, config })
    }

    /// Run one handshake round
    pub fn run(&self) -> Result<HandshakeReport> {
        handshake::run(&self.region(), Side::Initiator, &self.config.poll)
    }

    /// Clear payload and flag for another round
    ///
    /// The responder must reset its own payload too before it can start.
    pub fn reset(&self) {
        self.region().reset();
    }

    pub fn region(&self) -> HandshakeRegion<'_> {
        self.mapping.region()
    }

    pub fn namespace(&self) -> &str {
        self.mapping.name()
    }
}

/// Side 1 of the rendezvous
pub struct Responder {
    mapping: PeerMapping,
    config: HandshakeConfig,
}

impl Responder {
    /// Connect to a rendezvous created by an [`Initiator`]
    pub fn connect(namespace: &str, config: HandshakeConfig) -> Result<Self> {
        let mapping = PeerMapping::open(namespace, config.layout)?;
        Ok(Self { mapping, config })
    }

    /// Connect, retrying until the initiator has created and sized the page
    ///
    /// Uses the configured poll interval and timeout; without a timeout this
    /// waits forever for the initiator.
    pub fn connect_wait(namespace: &str, config: HandshakeConfig) -> Result<Self> {
        let deadline = config.poll.timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            match Self::connect(namespace, config) {
                Err(e) if e.is_peer_absent() && deadline.map_or(true, |d| Instant::now() < d) => {}
                other => return other,
            }
            thread::sleep(config.poll.interval.unwrap_or(CONNECT_RETRY));
        }
    }

    /// Run one handshake round
    pub fn run(&self) -> Result<HandshakeReport> {
        handshake::run(&self.region(), Side::Responder, &self.config.poll)
    }

    /// Clear this side's payload
    ///
    /// Leaves the flag alone: the initiator starts the next round, and
    /// clearing ACKED here would race with it.
    pub fn reset(&self) {
        self.region().store_payload([0, 0]);
    }

    pub fn region(&self) -> HandshakeRegion<'_> {
        self.mapping.region()
    }

    /// Current flag value as seen through the shared page
    pub fn flag_state(&self) -> FlagState {
        self.region().flag_state()
    }

    pub fn namespace(&self) -> &str {
        self.mapping.name()
    }
}
