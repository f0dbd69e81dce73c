//! Request scheduling: the worker thread, due-request selection and
//! callback dispatch.

use super::Shared;
use super::config::{DiscontinuityThreshold, RequestThreshold};
use super::requests::{Request, RequestCallback, RequestId, RequestPool};
use super::state::TimeBase;
use crate::clock::MediaTime;
use crate::error::{Error, Result};
use crate::observability::instrument_clock;
use crate::timer::Timer;
use crate::wake::WakeSignal;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

/// Longest timer period. The worker re-evaluates and re-arms on expiry.
const MAX_TIMER_DELAY_US: u64 = 3_600_000_000;

// ============================================================================
// Locked state
// ============================================================================

/// Everything guarded by the clock's state lock.
pub(crate) struct Inner {
    pub(crate) base: TimeBase,
    pub(crate) discontinuity: DiscontinuityThreshold,
    pub(crate) request_threshold: RequestThreshold,
    /// Created on the first request.
    pub(crate) scheduling: Option<Scheduling>,
    pub(crate) destroyed: bool,
}

/// Window after a backward jump during which requests from the old
/// timeline fire immediately.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DiscontinuityWindow {
    start: i64,
    end: i64,
    /// Wall time at which the window closes.
    expiry: i64,
}

/// Resources needed to service requests.
pub(crate) struct Scheduling {
    pub(crate) pool: RequestPool,
    pub(crate) wake: Arc<WakeSignal>,
    pub(crate) timer: Box<dyn Timer>,
    pub(crate) worker: Option<JoinHandle<()>>,
    /// Media time when the timer was last armed.
    pub(crate) at_timer: Option<i64>,
    pub(crate) window: Option<DiscontinuityWindow>,
}

impl Scheduling {
    /// Create the wake signal, timer, pool and worker thread.
    ///
    /// Anything created before a failure is released on return.
    pub(crate) fn create(shared: &Arc<Shared>, reverse: bool) -> Result<Self> {
        let mut pool = RequestPool::new(shared.request_slots)?;
        pool.set_reverse(reverse);

        let wake = Arc::new(
            WakeSignal::new()
                .map_err(|e| Error::OutOfResources(format!("wake signal: {}", e)))?,
        );
        let timer = shared
            .backend
            .create(Arc::clone(&wake))
            .map_err(|e| Error::OutOfResources(format!("timer: {}", e)))?;

        let worker_shared = Arc::clone(shared);
        let worker_wake = Arc::clone(&wake);
        let worker = std::thread::Builder::new()
            .name(format!("{}-sched", shared.name))
            .spawn(move || run_worker(worker_shared, worker_wake))
            .map_err(|e| Error::OutOfResources(format!("worker thread: {}", e)))?;

        tracing::debug!(
            clock = %shared.name,
            timer = shared.backend.name(),
            slots = shared.request_slots,
            "scheduling resources created"
        );

        Ok(Self {
            pool,
            wake,
            timer,
            worker: Some(worker),
            at_timer: None,
            window: None,
        })
    }

    pub(crate) fn worker_thread(&self) -> Option<ThreadId> {
        self.worker.as_ref().map(|w| w.thread().id())
    }
}

/// A request ready for its callback.
pub(crate) struct Fired {
    id: RequestId,
    requested: MediaTime,
    time: MediaTime,
    callback: RequestCallback,
}

impl Fired {
    pub(crate) fn new(request: Request, time: MediaTime) -> Self {
        Self {
            id: request.id,
            requested: request.requested,
            time,
            callback: request.callback,
        }
    }
}

/// Scheduler tunables copied out of the configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Tuning {
    pub(crate) resolution_us: i64,
    pub(crate) paused_poll_us: i64,
}

impl Inner {
    /// Pick every request that is due at wall time `now` and re-arm the
    /// timer for the next one.
    pub(crate) fn collect_due(&mut self, now: i64, tuning: Tuning, shared: &Shared) -> Vec<Fired> {
        let mut fired = Vec::new();
        let Inner {
            base,
            discontinuity,
            scheduling,
            ..
        } = self;
        let Some(sched) = scheduling.as_mut() else {
            return fired;
        };
        if sched.pool.is_empty() || !base.is_active() {
            return fired;
        }

        let scale = base.scale_q16();
        let media_now = base.media_time(now);
        let media = media_now.as_micros();
        let wall = base.wall_time();

        // Backward jumps are only detected for forward playback
        if let Some(at_timer) = sched.at_timer {
            if scale > 0 && media.saturating_add(discontinuity.threshold.as_micros()) < at_timer {
                tracing::info!(
                    clock = %shared.name,
                    was = at_timer,
                    now = media,
                    pending = sched.pool.len(),
                    "media time discontinuity"
                );
                shared.metrics.record_discontinuity();

                let duration = discontinuity.duration.as_micros();
                sched.window = Some(DiscontinuityWindow {
                    start: at_timer,
                    end: at_timer.saturating_add(duration),
                    expiry: wall.saturating_add(duration),
                });
                fired.extend(
                    sched
                        .pool
                        .drain()
                        .into_iter()
                        .map(|r| Fired::new(r, media_now)),
                );
                sched.at_timer = None;
            }
        }

        if sched.window.is_some_and(|w| wall > w.expiry) {
            sched.window = None;
        }

        while let Some(adjusted) = sched.pool.front_adjusted() {
            let in_window = sched
                .window
                .is_some_and(|w| w.start <= adjusted && adjusted < w.end);
            let due = in_window
                || (scale > 0 && media.saturating_add(tuning.resolution_us) >= adjusted)
                || (scale < 0 && media.saturating_sub(tuning.resolution_us) <= adjusted);

            if due {
                if let Some(request) = sched.pool.pop_front() {
                    fired.push(Fired::new(request, media_now));
                }
                continue;
            }

            let delay_us = if scale == 0 {
                tuning.paused_poll_us.max(0) as u64
            } else {
                let distance = media.abs_diff(adjusted) as i128;
                let wall_us = (base.scale_inv_q16() as i128 * distance) >> 16;
                wall_us.unsigned_abs().min(MAX_TIMER_DELAY_US as u128) as u64
            };
            sched.at_timer = Some(media);
            if let Err(e) = sched.timer.set(Duration::from_micros(delay_us)) {
                tracing::error!(clock = %shared.name, error = %e, "failed to arm timer");
            }
            shared.metrics.record_timer_delay(delay_us);
            tracing::trace!(
                clock = %shared.name,
                now = media,
                next = adjusted,
                delay_us,
                "timer re-armed"
            );
            break;
        }

        if !fired.is_empty() {
            shared.metrics.record_serviced(fired.len());
        }
        fired
    }

    /// Take every pending request.
    pub(crate) fn take_pending(&mut self) -> Vec<Request> {
        match self.scheduling.as_mut() {
            Some(sched) => {
                sched.at_timer = None;
                sched.pool.drain()
            }
            None => Vec::new(),
        }
    }

    /// Handle for waking the worker, if there is one.
    pub(crate) fn wake_handle(&self) -> Option<Arc<WakeSignal>> {
        self.scheduling.as_ref().map(|s| Arc::clone(&s.wake))
    }
}

// ============================================================================
// Dispatch
// ============================================================================

thread_local! {
    /// Clocks whose callbacks are running on this thread.
    static DISPATCHING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Serializes callbacks of one clock.
///
/// Taken before the state lock. A thread already dispatching for the same
/// clock (a callback calling back into it) re-enters without locking.
pub(crate) struct DispatchGuard<'a> {
    clock: u64,
    name: &'a str,
    _lock: Option<MutexGuard<'a, ()>>,
}

impl Shared {
    /// True when the current thread is running callbacks of this clock.
    pub(crate) fn is_dispatching(&self) -> bool {
        DISPATCHING.with(|d| d.borrow().contains(&self.id))
    }

    pub(crate) fn enter_dispatch(&self) -> DispatchGuard<'_> {
        let lock = if self.is_dispatching() {
            None
        } else {
            Some(self.dispatch.lock().unwrap_or_else(PoisonError::into_inner))
        };
        DISPATCHING.with(|d| d.borrow_mut().push(self.id));
        DispatchGuard {
            clock: self.id,
            name: &self.name,
            _lock: lock,
        }
    }
}

impl DispatchGuard<'_> {
    /// Invoke callbacks in order. A panicking callback is logged and skipped.
    pub(crate) fn run(&self, fired: Vec<Fired>) {
        for Fired {
            id,
            requested,
            time,
            callback,
        } in fired
        {
            tracing::trace!(
                clock = %self.name,
                request = %id,
                requested = %requested,
                time = %time,
                "servicing request"
            );
            if catch_unwind(AssertUnwindSafe(move || callback(time))).is_err() {
                tracing::error!(clock = %self.name, request = %id, "request callback panicked");
            }
        }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        DISPATCHING.with(|d| {
            let mut d = d.borrow_mut();
            if let Some(pos) = d.iter().rposition(|&c| c == self.clock) {
                d.remove(pos);
            }
        });
    }
}

// ============================================================================
// Worker
// ============================================================================

fn run_worker(shared: Arc<Shared>, wake: Arc<WakeSignal>) {
    let _span = instrument_clock(&shared.name);
    tracing::debug!("scheduler started");

    loop {
        if let Err(e) = wake.wait() {
            tracing::error!(error = %e, "wake signal failed, scheduler stopping");
            break;
        }

        // Either the timer expired or the state changed
        {
            let mut inner = shared.lock();
            match inner.scheduling.as_mut() {
                Some(sched) => {
                    if let Err(e) = sched.timer.cancel() {
                        tracing::warn!(error = %e, "failed to cancel timer");
                    }
                }
                None => break,
            }
        }

        process_requests(&shared);
    }

    tracing::debug!("scheduler stopped");
}

/// Fire every due request.
pub(crate) fn process_requests(shared: &Shared) {
    let guard = shared.enter_dispatch();
    let fired = {
        let mut inner = shared.lock();
        let now = shared.now_us();
        inner.collect_due(now, shared.tuning, shared)
    };
    guard.run(fired);
}
