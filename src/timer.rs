//! One-shot timers that post to a [`WakeSignal`] on expiry.
//!
//! The scheduler arms a single timer for the wall-time delay until the
//! earliest pending request. Backends are injected through
//! [`ClockConfig`](crate::media_clock::ClockConfig):
//!
//! - [`ThreadTimerBackend`]: portable, a helper thread sleeping on a
//!   condition variable.
//! - [`TimerFdBackend`] (Linux): a `timerfd` read by a helper thread.
//!
//! Each backend reports a resolution: requests due within that margin of
//! the current media time are treated as due, so a coarse timer never
//! leaves a request waiting for an extra period.

use crate::error::Result;
use crate::wake::WakeSignal;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// An armed-or-idle one-shot timer.
pub trait Timer: Send {
    /// Arm the timer to fire once after `delay`, replacing any earlier setting.
    fn set(&mut self, delay: Duration) -> Result<()>;

    /// Disarm the timer. A no-op when idle.
    fn cancel(&mut self) -> Result<()>;
}

/// Factory for timers.
pub trait TimerBackend: Send + Sync {
    /// Create a timer that posts to `wake` whenever it fires.
    fn create(&self, wake: Arc<WakeSignal>) -> Result<Box<dyn Timer>>;

    /// Margin (µs) within which a request counts as due.
    fn resolution_us(&self) -> i64;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// The preferred backend on this platform.
pub fn default_backend() -> Arc<dyn TimerBackend> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(TimerFdBackend)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(ThreadTimerBackend::default())
    }
}

// ============================================================================
// Thread timer
// ============================================================================

/// Portable backend: one sleeping helper thread per timer.
#[derive(Clone, Debug)]
pub struct ThreadTimerBackend {
    resolution_us: i64,
}

impl ThreadTimerBackend {
    /// Default due margin for condition-variable sleeps.
    pub const DEFAULT_RESOLUTION_US: i64 = 1_000;

    /// Create a backend with a custom due margin.
    pub fn with_resolution_us(resolution_us: i64) -> Self {
        Self {
            resolution_us: resolution_us.max(0),
        }
    }
}

impl Default for ThreadTimerBackend {
    fn default() -> Self {
        Self {
            resolution_us: Self::DEFAULT_RESOLUTION_US,
        }
    }
}

impl TimerBackend for ThreadTimerBackend {
    fn create(&self, wake: Arc<WakeSignal>) -> Result<Box<dyn Timer>> {
        Ok(Box::new(ThreadTimer::spawn(wake)?))
    }

    fn resolution_us(&self) -> i64 {
        self.resolution_us
    }

    fn name(&self) -> &str {
        "thread"
    }
}

#[derive(Default)]
struct Deadline {
    at: Option<Instant>,
    stop: bool,
}

struct ThreadTimer {
    shared: Arc<(Mutex<Deadline>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    fn spawn(wake: Arc<WakeSignal>) -> Result<Self> {
        let shared = Arc::new((Mutex::new(Deadline::default()), Condvar::new()));
        let thread_shared = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name("mediaclock-timer".to_string())
            .spawn(move || {
                let (lock, cond) = &*thread_shared;
                let mut deadline = lock.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    if deadline.stop {
                        break;
                    }
                    match deadline.at {
                        None => {
                            deadline = cond.wait(deadline).unwrap_or_else(PoisonError::into_inner);
                        }
                        Some(at) => {
                            let now = Instant::now();
                            if now >= at {
                                deadline.at = None;
                                drop(deadline);
                                if let Err(e) = wake.notify() {
                                    tracing::warn!(error = %e, "timer failed to post wake-up");
                                }
                                deadline = lock.lock().unwrap_or_else(PoisonError::into_inner);
                            } else {
                                deadline = cond
                                    .wait_timeout(deadline, at - now)
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .0;
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    fn update(&self, f: impl FnOnce(&mut Deadline)) {
        let (lock, cond) = &*self.shared;
        let mut deadline = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut deadline);
        cond.notify_one();
    }
}

impl Timer for ThreadTimer {
    fn set(&mut self, delay: Duration) -> Result<()> {
        // Beyond the range of Instant the timer never fires
        let at = Instant::now().checked_add(delay);
        self.update(|d| d.at = at);
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.update(|d| d.at = None);
        Ok(())
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.update(|d| d.stop = true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ============================================================================
// timerfd (Linux)
// ============================================================================

#[cfg(target_os = "linux")]
use rustix::time::{
    Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags, Timespec, timerfd_create,
    timerfd_settime,
};
#[cfg(target_os = "linux")]
use std::os::fd::OwnedFd;
#[cfg(target_os = "linux")]
use std::sync::atomic::{AtomicBool, Ordering};

/// Linux backend: a monotonic `timerfd` with microsecond resolution.
#[cfg(target_os = "linux")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TimerFdBackend;

#[cfg(target_os = "linux")]
impl TimerBackend for TimerFdBackend {
    fn create(&self, wake: Arc<WakeSignal>) -> Result<Box<dyn Timer>> {
        Ok(Box::new(TimerFd::spawn(wake)?))
    }

    fn resolution_us(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "timerfd"
    }
}

#[cfg(target_os = "linux")]
struct TimerFd {
    fd: Arc<OwnedFd>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

#[cfg(target_os = "linux")]
impl TimerFd {
    fn spawn(wake: Arc<WakeSignal>) -> Result<Self> {
        let fd = Arc::new(timerfd_create(
            TimerfdClockId::Monotonic,
            TimerfdFlags::CLOEXEC,
        )?);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_fd = Arc::clone(&fd);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("mediaclock-timerfd".to_string())
            .spawn(move || {
                let mut buf = [0u8; 8];
                loop {
                    match rustix::io::read(&*thread_fd, &mut buf) {
                        Ok(_) => {
                            if thread_stop.load(Ordering::Acquire) {
                                break;
                            }
                            if let Err(e) = wake.notify() {
                                tracing::warn!(error = %e, "timer failed to post wake-up");
                            }
                        }
                        Err(rustix::io::Errno::INTR) => continue,
                        Err(e) => {
                            tracing::error!(error = %e, "timerfd read failed");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            fd,
            stop,
            thread: Some(thread),
        })
    }

    fn arm(&self, value: Timespec) -> Result<()> {
        let spec = Itimerspec {
            it_interval: Timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: value,
        };
        timerfd_settime(&*self.fd, TimerfdTimerFlags::empty(), &spec)?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl Timer for TimerFd {
    fn set(&mut self, delay: Duration) -> Result<()> {
        // A zero value disarms the timer
        let delay = delay.max(Duration::from_nanos(1));
        self.arm(Timespec {
            tv_sec: delay.as_secs() as _,
            tv_nsec: delay.subsec_nanos() as _,
        })
    }

    fn cancel(&mut self) -> Result<()> {
        self.arm(Timespec {
            tv_sec: 0,
            tv_nsec: 0,
        })
    }
}

#[cfg(target_os = "linux")]
impl Drop for TimerFd {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Fire once more so the helper thread leaves its blocking read
        if let Err(e) = self.set(Duration::from_nanos(1)) {
            tracing::error!(error = %e, "failed to stop timerfd thread");
            return;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
