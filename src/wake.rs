//! Wake signal for the scheduler worker.
//!
//! Requests, state changes and timer expiry all post to the same signal;
//! the worker blocks on it. Posts made while the worker is busy coalesce
//! into a single wake-up, which is fine because every wake-up re-evaluates
//! the whole pending queue.

use crate::error::Result;

// ============================================================================
// Linux: eventfd
// ============================================================================

#[cfg(target_os = "linux")]
use rustix::event::{EventfdFlags, eventfd};
#[cfg(target_os = "linux")]
use std::os::fd::OwnedFd;

/// Counting wake-up primitive backed by an eventfd.
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct WakeSignal {
    fd: OwnedFd,
}

#[cfg(target_os = "linux")]
impl WakeSignal {
    /// Create a new signal with no pending wake-ups.
    pub fn new() -> Result<Self> {
        let fd = eventfd(0, EventfdFlags::CLOEXEC)?;
        Ok(Self { fd })
    }

    /// Post a wake-up. Safe to call from any thread.
    pub fn notify(&self) -> Result<()> {
        let bytes = 1u64.to_ne_bytes();
        loop {
            match rustix::io::write(&self.fd, &bytes) {
                Ok(_) => return Ok(()),
                Err(rustix::io::Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Block until at least one wake-up was posted, consuming all of them.
    ///
    /// Returns the number of coalesced posts.
    pub fn wait(&self) -> Result<u64> {
        let mut buf = [0u8; 8];
        loop {
            match rustix::io::read(&self.fd, &mut buf) {
                Ok(8) => return Ok(u64::from_ne_bytes(buf)),
                Ok(_) => continue,
                Err(rustix::io::Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ============================================================================
// Portable fallback
// ============================================================================

#[cfg(not(target_os = "linux"))]
use std::sync::{Condvar, Mutex, PoisonError};

/// Counting wake-up primitive built on a mutex and condition variable.
#[cfg(not(target_os = "linux"))]
#[derive(Debug, Default)]
pub struct WakeSignal {
    count: Mutex<u64>,
    cond: Condvar,
}

#[cfg(not(target_os = "linux"))]
impl WakeSignal {
    /// Create a new signal with no pending wake-ups.
    pub fn new() -> Result<Self> {
        Ok(Self::default())
    }

    /// Post a wake-up. Safe to call from any thread.
    pub fn notify(&self) -> Result<()> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_add(1);
        self.cond.notify_one();
        Ok(())
    }

    /// Block until at least one wake-up was posted, consuming all of them.
    ///
    /// Returns the number of coalesced posts.
    pub fn wait(&self) -> Result<u64> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count == 0 {
            count = self
                .cond
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(std::mem::take(&mut *count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_posts_coalesce() {
        let wake = WakeSignal::new().unwrap();
        wake.notify().unwrap();
        wake.notify().unwrap();
        wake.notify().unwrap();
        assert_eq!(wake.wait().unwrap(), 3);
    }

    #[test]
    fn test_wait_blocks_until_notified() {
        let wake = Arc::new(WakeSignal::new().unwrap());
        let poster = {
            let wake = Arc::clone(&wake);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                wake.notify().unwrap();
            })
        };
        assert_eq!(wake.wait().unwrap(), 1);
        poster.join().unwrap();
    }
}
