//! The two-sided handshake
//!
//! Flag protocol: `EMPTY(0) -> READY(MAP1) -> ACKED(MAP2)`.
//!
//! - Side 0 (initiator) writes its payload, performs `EMPTY -> READY` and
//!   waits for `ACKED`.
//! - Side 1 (responder) writes its payload, waits for `READY` and performs
//!   `READY -> ACKED`.
//!
//! Both then re-read their own payload. `ACKED` is terminal; another round
//! needs [`HandshakeRegion::reset`] on both sides.

use crate::error::{RendezvousError, Result};
use crate::layout::{FlagState, HandshakeRegion, RegionLayout, MAP_MAGIC_1, MAP_MAGIC_2};
use crate::wait::{poll_until, PollConfig};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Which end of the handshake this participant plays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Side 0: raises READY, waits for ACKED
    Initiator,
    /// Side 1: waits for READY, raises ACKED
    Responder,
}

impl Side {
    #[inline]
    pub fn index(self) -> u8 {
        match self {
            Side::Initiator => 0,
            Side::Responder => 1,
        }
    }

    /// Magic written into this side's first payload word
    #[inline]
    pub fn magic(self) -> u32 {
        match self {
            Side::Initiator => MAP_MAGIC_1,
            Side::Responder => MAP_MAGIC_2,
        }
    }

    /// Both payload words this side writes and later validates
    #[inline]
    pub fn payload(self) -> [u32; 2] {
        let magic = self.magic();
        [magic, magic.wrapping_add(1)]
    }

    #[inline]
    pub fn peer(self) -> Side {
        match self {
            Side::Initiator => Side::Responder,
            Side::Responder => Side::Initiator,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            Side::Initiator => "initiator",
            Side::Responder => "responder",
        };
        write!(f, "side{}/{}", self.index(), role)
    }
}

/// Point in the handshake where a side is blocked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Responder waiting for READY
    AwaitReady,
    /// Initiator waiting for ACKED
    AwaitAck,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::AwaitReady => "awaiting READY",
            Stage::AwaitAck => "awaiting ACKED",
        };
        f.write_str(s)
    }
}

/// Handshake configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Slot layout of the region
    pub layout: RegionLayout,
    /// Wait strategy for the precondition and the peer
    pub poll: PollConfig,
}

/// Result of a completed handshake
#[derive(Clone, Debug)]
pub struct HandshakeReport {
    pub side: Side,
    /// Flag value observed at completion
    pub flag: FlagState,
    /// Payload read back after the round-trip
    pub payload: [u32; 2],
    /// Failed polls across all waits
    pub polls: u64,
    pub elapsed: Duration,
}

/// Run side 0 over `region`
pub fn initiate(region: &HandshakeRegion<'_>, poll: &PollConfig) -> Result<HandshakeReport> {
    run(region, Side::Initiator, poll)
}

/// Run side 1 over `region`
pub fn respond(region: &HandshakeRegion<'_>, poll: &PollConfig) -> Result<HandshakeReport> {
    run(region, Side::Responder, poll)
}

/// Run one side of the handshake
pub fn run(region: &HandshakeRegion<'_>, side: Side, poll: &PollConfig) -> Result<HandshakeReport> {
    let start = Instant::now();
    let span = tracing::debug_span!("handshake", side = %side);
    let _guard = span.enter();

    let mut polls = await_precondition(region, side, poll)?;

    region.store_payload(side.payload());
    debug!(payload = ?side.payload(), "payload written");

    match side {
        Side::Initiator => {
            region.raise(FlagState::Ready);
            debug!("flag raised to READY");
            polls += await_flag(region, FlagState::Acked, Stage::AwaitAck, poll)?;
            debug!(polls, peer = %side.peer(), "peer acknowledged");
        }
        Side::Responder => {
            polls += await_flag(region, FlagState::Ready, Stage::AwaitReady, poll)?;
            debug!(polls, peer = %side.peer(), "peer ready");
            region.raise(FlagState::Acked);
            debug!("flag raised to ACKED");
        }
    }

    let payload = verify_payload(region, side)?;

    Ok(HandshakeReport {
        side,
        flag: region.flag_state(),
        payload,
        polls,
        elapsed: start.elapsed(),
    })
}

/// Map a handshake outcome onto the C status code
///
/// `0` success, `1` payload mismatch, `2` anything else.
pub fn status_code(result: &Result<HandshakeReport>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

/// Wait until this side may start a round
///
/// The first payload word must be zero. The initiator also needs an EMPTY
/// flag, since it performs the first transition. The responder cannot
/// require that: the initiator may already have raised READY.
fn await_precondition(region: &HandshakeRegion<'_>, side: Side, poll: &PollConfig) -> Result<u64> {
    let mut polls = await_zero(region.payload_cell(0), "payload word 0", poll)?;
    if side == Side::Initiator {
        polls += await_zero(region.flag_cell(), "flag", poll)?;
    }
    Ok(polls)
}

fn await_zero(cell: &AtomicU32, what: &'static str, poll: &PollConfig) -> Result<u64> {
    let current = cell.load(Ordering::Acquire);
    if current == 0 {
        return Ok(0);
    }

    warn!(what, got = format_args!("0x{:08X}", current), "precondition not met, stalling");
    poll_until(cell, poll, |v| v == 0)
        .map_err(|e| RendezvousError::PreconditionStalled { what, got: e.last })
}

fn await_flag(
    region: &HandshakeRegion<'_>,
    want: FlagState,
    stage: Stage,
    poll: &PollConfig,
) -> Result<u64> {
    let want = want.raw();
    poll_until(region.flag_cell(), poll, |v| v == want).map_err(|e| {
        warn!(%stage, last = format_args!("0x{:08X}", e.last), "peer wait timed out");
        RendezvousError::Timeout {
            stage,
            last: e.last,
        }
    })
}

fn verify_payload(region: &HandshakeRegion<'_>, side: Side) -> Result<[u32; 2]> {
    let got = [region.payload(0), region.payload(1)];
    for (word, (&expected, &value)) in side.payload().iter().zip(got.iter()).enumerate() {
        if expected != value {
            warn!(
                word,
                expected = format_args!("0x{:08X}", expected),
                got = format_args!("0x{:08X}", value),
                "payload corrupted during handshake"
            );
            return Err(RendezvousError::PayloadMismatch {
                word,
                expected,
                got: value,
            });
        }
    }
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// One side's private payload pages
    #[derive(Default)]
    struct Payload {
        a: AtomicU32,
        b: AtomicU32,
    }

    fn bounded() -> PollConfig {
        PollConfig::spin().with_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_side_payloads() {
        assert_eq!(Side::Initiator.payload(), [0x3150414d, 0x3150414e]);
        assert_eq!(Side::Responder.payload(), [0x3250414d, 0x3250414e]);
        assert_eq!(Side::Initiator.peer(), Side::Responder);
        assert_eq!(Side::Responder.index(), 1);
        assert_eq!(Side::Initiator.to_string(), "side0/initiator");
        assert_eq!(Side::Responder.to_string(), "side1/responder");
    }

    #[test]
    fn test_concurrent_handshake_succeeds() {
        let flag = AtomicU32::new(0);
        let (p0, p1) = (Payload::default(), Payload::default());

        let (r0, r1) = thread::scope(|s| {
            let h0 = s.spawn(|| {
                let region = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
                initiate(&region, &bounded())
            });
            let h1 = s.spawn(|| {
                let region = HandshakeRegion::from_cells(&p1.a, &p1.b, &flag);
                respond(&region, &bounded())
            });
            (h0.join().unwrap(), h1.join().unwrap())
        });

        let r0 = r0.unwrap();
        let r1 = r1.unwrap();
        assert_eq!(r0.payload, [MAP_MAGIC_1, MAP_MAGIC_1 + 1]);
        assert_eq!(r1.payload, [MAP_MAGIC_2, MAP_MAGIC_2 + 1]);
        assert_eq!(r0.flag, FlagState::Acked);
        assert_eq!(flag.load(Ordering::SeqCst), MAP_MAGIC_2);
        assert_eq!(p0.a.load(Ordering::SeqCst), MAP_MAGIC_1);
        assert_eq!(p1.b.load(Ordering::SeqCst), MAP_MAGIC_2 + 1);
    }

    #[test]
    fn test_responder_started_first() {
        let flag = AtomicU32::new(0);
        let (p0, p1) = (Payload::default(), Payload::default());

        thread::scope(|s| {
            let h1 = s.spawn(|| {
                let region = HandshakeRegion::from_cells(&p1.a, &p1.b, &flag);
                respond(&region, &bounded())
            });
            thread::sleep(Duration::from_millis(20));
            let region = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
            assert_eq!(status_code(&initiate(&region, &bounded())), 0);
            assert_eq!(status_code(&h1.join().unwrap()), 0);
        });
    }

    #[test]
    fn test_shared_payload_is_detected() {
        // Both sides see the same payload pages, as with a broken private map
        let flag = AtomicU32::new(0);
        let shared = Payload::default();
        let region = HandshakeRegion::from_cells(&shared.a, &shared.b, &flag);

        thread::scope(|s| {
            let h0 = s.spawn(|| initiate(&region, &bounded()));

            poll_until(&flag, &bounded(), |v| v == MAP_MAGIC_1).unwrap();
            // The peer clobbers the payload before acknowledging
            shared.a.store(MAP_MAGIC_2, Ordering::Relaxed);
            region.raise(FlagState::Acked);

            let result = h0.join().unwrap();
            assert_eq!(status_code(&result), 1);
            assert!(matches!(
                result,
                Err(RendezvousError::PayloadMismatch {
                    word: 0,
                    expected: MAP_MAGIC_1,
                    got: MAP_MAGIC_2,
                })
            ));
        });
    }

    #[test]
    fn test_nonzero_flag_stalls_initiator() {
        let flag = AtomicU32::new(0x1);
        let p0 = Payload::default();
        let region = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
        let poll = PollConfig::spin().with_timeout(Duration::from_millis(50));

        let err = initiate(&region, &poll).unwrap_err();
        assert!(matches!(
            err,
            RendezvousError::PreconditionStalled { what: "flag", got: 1 }
        ));
        // Nothing was written
        assert_eq!(p0.a.load(Ordering::SeqCst), 0);
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nonzero_flag_never_returns_without_timeout() {
        let flag = AtomicU32::new(0x1);
        let p0 = Payload::default();

        thread::scope(|s| {
            let handle = s.spawn(|| {
                let region = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
                initiate(&region, &PollConfig::spin().with_interval(Duration::from_millis(1)))
            });

            thread::sleep(Duration::from_millis(100));
            assert!(!handle.is_finished());

            // Releasing the stall lets the round proceed; acknowledge it so
            // the scoped thread can be joined.
            flag.store(0, Ordering::Release);
            poll_until(&flag, &bounded(), |v| v == MAP_MAGIC_1).unwrap();
            flag.store(MAP_MAGIC_2, Ordering::Release);
            assert!(handle.join().unwrap().is_ok());
        });
    }

    #[test]
    fn test_dirty_payload_stalls_responder() {
        let flag = AtomicU32::new(0);
        let p1 = Payload::default();
        p1.a.store(9, Ordering::Relaxed);
        let region = HandshakeRegion::from_cells(&p1.a, &p1.b, &flag);
        let poll = PollConfig::spin().with_timeout(Duration::from_millis(20));

        assert!(matches!(
            respond(&region, &poll),
            Err(RendezvousError::PreconditionStalled {
                what: "payload word 0",
                got: 9
            })
        ));
    }

    #[test]
    fn test_responder_never_leaves_await_ready_on_stale_flag() {
        for preset in [MAP_MAGIC_2, 0x1] {
            let flag = AtomicU32::new(preset);
            let p1 = Payload::default();
            let region = HandshakeRegion::from_cells(&p1.a, &p1.b, &flag);
            let poll = PollConfig::spin().with_timeout(Duration::from_millis(30));

            match respond(&region, &poll) {
                Err(RendezvousError::Timeout { stage, last }) => {
                    assert_eq!(stage, Stage::AwaitReady);
                    assert_eq!(last, preset);
                }
                other => panic!("preset 0x{:08X}: expected timeout, got {:?}", preset, other),
            }
            // The flag is never acknowledged over a non-READY value
            assert_eq!(flag.load(Ordering::SeqCst), preset);
        }
    }

    #[test]
    fn test_dirty_payload_stalls_initiator() {
        let flag = AtomicU32::new(0);
        let p0 = Payload::default();
        p0.a.store(MAP_MAGIC_1, Ordering::Relaxed);
        let region = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
        let poll = PollConfig::spin().with_timeout(Duration::from_millis(20));

        assert!(matches!(
            initiate(&region, &poll),
            Err(RendezvousError::PreconditionStalled {
                what: "payload word 0",
                got: MAP_MAGIC_1
            })
        ));
        assert_eq!(flag.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_max_timeout_does_not_overflow() {
        let flag = AtomicU32::new(0);
        let (p0, p1) = (Payload::default(), Payload::default());
        let poll = PollConfig::spin().with_timeout(Duration::MAX);

        thread::scope(|s| {
            let h1 = s.spawn(|| respond(&HandshakeRegion::from_cells(&p1.a, &p1.b, &flag), &poll));
            let r0 = initiate(&HandshakeRegion::from_cells(&p0.a, &p0.b, &flag), &poll);
            assert!(r0.is_ok());
            assert!(h1.join().unwrap().is_ok());
        });
    }

    #[test]
    fn test_missing_peer_times_out() {
        let flag = AtomicU32::new(0);
        let p0 = Payload::default();
        let region = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
        let poll = PollConfig::spin().with_timeout(Duration::from_millis(20));

        let err = initiate(&region, &poll).unwrap_err();
        assert!(matches!(
            err,
            RendezvousError::Timeout {
                stage: Stage::AwaitAck,
                last: MAP_MAGIC_1
            }
        ));
        assert_eq!(err.status_code(), 2);
    }

    #[test]
    fn test_reset_allows_second_round() {
        let flag = AtomicU32::new(0);
        let (p0, p1) = (Payload::default(), Payload::default());
        let r0 = HandshakeRegion::from_cells(&p0.a, &p0.b, &flag);
        let r1 = HandshakeRegion::from_cells(&p1.a, &p1.b, &flag);

        for _ in 0..3 {
            thread::scope(|s| {
                let h1 = s.spawn(|| respond(&r1, &bounded()));
                initiate(&r0, &bounded()).unwrap();
                h1.join().unwrap().unwrap();
            });
            assert_eq!(r0.flag_state(), FlagState::Acked);
            r0.reset();
            r1.reset();
        }
    }
}
