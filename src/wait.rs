//! Polling waits on a shared word
//!
//! The default is a pure spin with no timeout: a peer that never signals
//! blocks the caller forever. Both the poll interval and the timeout can be
//! set explicitly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How a side waits for the peer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between polls; `None` spins with `spin_loop`
    pub interval: Option<Duration>,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl PollConfig {
    /// Spin forever
    pub fn spin() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// Returned when the timeout elapsed before the condition held
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expired {
    /// Last value observed
    pub last: u32,
    /// Failed polls before giving up
    pub polls: u64,
}

/// Poll `cell` with `Acquire` loads until `done` accepts its value
///
/// Returns the number of failed polls before the condition held.
pub fn poll_until<F>(cell: &AtomicU32, config: &PollConfig, mut done: F) -> Result<u64, Expired>
where
    F: FnMut(u32) -> bool,
{
    // A timeout past the end of the clock is no timeout
    let deadline = config.timeout.and_then(|t| Instant::now().checked_add(t));
    let mut polls = 0u64;

    loop {
        let value = cell.load(Ordering::Acquire);
        if done(value) {
            return Ok(polls);
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Expired { last: value, polls });
            }
        }

        polls += 1;
        match config.interval {
            Some(interval) => thread::sleep(interval),
            None => core::hint::spin_loop(),
        }
    }
}
