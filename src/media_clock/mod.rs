//! The adjustable media clock.
//!
//! A [`MediaClock`] maps wall time onto media time at a signed rational
//! [scale](MediaClock::set_scale), and services requests to be called back
//! when the media time reaches a given value.
//!
//! # States
//!
//! - **Inactive**: media time is frozen; [`set_media_time`](MediaClock::set_media_time)
//!   takes the reference as is.
//! - **Active**: media time advances at `scale × wall rate`; references are
//!   smoothed through the [`UpdateThreshold`] hysteresis. A scale of zero
//!   pauses an active clock.
//!
//! # Scheduling
//!
//! The request pool, timer and worker thread are created on the first
//! request. Callbacks run on the worker thread, outside the state lock, one
//! at a time per clock; they may call back into the clock.
//!
//! # Example
//!
//! ```rust
//! use mediaclock::clock::MediaTime;
//! use mediaclock::media_clock::MediaClock;
//! use std::sync::mpsc;
//!
//! let clock = MediaClock::new();
//! clock.set_media_time(MediaTime::from_secs(1)).unwrap();
//! clock.set_active(true);
//!
//! let (tx, rx) = mpsc::channel();
//! clock
//!     .add_request(MediaTime::from_micros(1_010_000), move |t| {
//!         let _ = tx.send(t);
//!     })
//!     .unwrap();
//!
//! let serviced = rx.recv().unwrap();
//! assert!(serviced >= MediaTime::from_micros(1_000_000));
//! ```

mod config;
mod requests;
mod scheduler;
mod state;

pub use config::{
    ClockConfig, DEFAULT_LEAD_TIME_US, DEFAULT_PAUSED_POLL, DEFAULT_REQUEST_SLOTS,
    DiscontinuityThreshold, RequestThreshold, UpdateThreshold,
};
pub use requests::{RequestCallback, RequestId};

use crate::clock::{Clock, MediaTime};
use crate::error::{Error, Result};
use crate::observability::{ClockMetrics, trace_state_change};
use crate::rational::Rational;
use crate::timer::TimerBackend;
use crate::wake::WakeSignal;
use scheduler::{DispatchGuard, Fired, Inner, Scheduling, Tuning};
use state::TimeBase;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Source of per-instance identifiers.
static NEXT_CLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between the clock handle and its worker thread.
pub(crate) struct Shared {
    id: u64,
    name: String,
    source: Arc<dyn Clock>,
    backend: Arc<dyn TimerBackend>,
    request_slots: usize,
    lead_time_us: i64,
    tuning: Tuning,
    metrics: ClockMetrics,
    state: Mutex<Inner>,
    dispatch: Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current wall time in microseconds.
    fn now_us(&self) -> i64 {
        self.source.now().as_wall_micros().as_micros()
    }
}

fn notify(name: &str, wake: Option<Arc<WakeSignal>>) {
    if let Some(wake) = wake {
        if let Err(e) = wake.notify() {
            tracing::warn!(clock = %name, error = %e, "failed to wake scheduler");
        }
    }
}

/// An adjustable media clock with a request scheduler.
///
/// Share it between threads with `Arc<MediaClock>`; every method takes
/// `&self`.
pub struct MediaClock {
    shared: Arc<Shared>,
}

impl MediaClock {
    /// Create a clock with the default configuration.
    pub fn new() -> Self {
        Self::build(ClockConfig::default())
    }

    /// Create a clock from a configuration.
    pub fn with_config(config: ClockConfig) -> Result<Self> {
        if config.request_slots == 0 {
            return Err(Error::InvalidArgument(
                "request pool needs at least one slot".to_string(),
            ));
        }
        if config.lead_time_us < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative lead time {}",
                config.lead_time_us
            )));
        }
        Ok(Self::build(config))
    }

    fn build(config: ClockConfig) -> Self {
        let now = config.time_source.now().as_wall_micros().as_micros();
        let tuning = Tuning {
            resolution_us: config.timer_backend.resolution_us(),
            paused_poll_us: config.paused_poll.as_micros().min(i64::MAX as u128) as i64,
        };
        let inner = Inner {
            base: TimeBase::new(config.scale, config.update_threshold, now),
            discontinuity: config.discontinuity_threshold,
            request_threshold: config.request_threshold,
            scheduling: None,
            destroyed: false,
        };
        tracing::debug!(
            clock = %config.name,
            source = config.time_source.name(),
            scale = %config.scale,
            "clock created"
        );
        Self {
            shared: Arc::new(Shared {
                id: NEXT_CLOCK_ID.fetch_add(1, Ordering::Relaxed),
                metrics: ClockMetrics::new(&config.name),
                name: config.name,
                source: config.time_source,
                backend: config.timer_backend,
                request_slots: config.request_slots,
                lead_time_us: config.lead_time_us,
                tuning,
                state: Mutex::new(inner),
                dispatch: Mutex::new(()),
            }),
        }
    }

    /// Clock name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Ask to be called back when the media time reaches `media_time`.
    ///
    /// The callback receives the media time at which it was serviced, or
    /// [`MediaTime::UNKNOWN`] if the request was flushed. It runs on the
    /// clock's worker thread and must not block for long.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] if the request threshold is enabled and
    ///   `media_time` lies beyond it.
    /// - [`Error::OutOfResources`] if the pool is full or the scheduling
    ///   resources could not be created.
    /// - [`Error::OutOfMemory`] if the request pool cannot be allocated.
    /// - [`Error::InvalidArgument`] for an unknown media time.
    /// - [`Error::Shutdown`] after [`destroy`](Self::destroy).
    pub fn add_request<F>(&self, media_time: MediaTime, callback: F) -> Result<RequestId>
    where
        F: FnOnce(MediaTime) + Send + 'static,
    {
        if media_time.is_unknown() {
            return Err(Error::InvalidArgument(
                "cannot schedule at an unknown media time".to_string(),
            ));
        }
        let callback: RequestCallback = Box::new(callback);
        let shared = &self.shared;

        let (id, wake) = {
            let mut inner = shared.lock();
            if inner.destroyed {
                return Err(Error::Shutdown);
            }

            let now = shared.now_us();
            let media_now = inner.base.media_time(now);

            let threshold = inner.request_threshold;
            if threshold.enabled {
                let limit = media_now.saturating_add(threshold.threshold);
                if media_time > limit {
                    tracing::trace!(
                        clock = %shared.name,
                        requested = %media_time,
                        now = %media_now,
                        "request beyond threshold"
                    );
                    shared.metrics.record_rejected();
                    return Err(Error::Rejected {
                        requested: media_time,
                        limit,
                    });
                }
            }

            if inner.scheduling.is_none() {
                let reverse = inner.base.is_reverse();
                let scheduling = Scheduling::create(shared, reverse).inspect_err(|e| {
                    tracing::error!(clock = %shared.name, error = %e, "failed to create scheduling resources");
                })?;
                inner.scheduling = Some(scheduling);
            }

            let adjusted = inner.base.adjusted(media_time, shared.lead_time_us);
            let active = inner.base.is_active();
            let Some(sched) = inner.scheduling.as_mut() else {
                return Err(Error::Shutdown);
            };
            let id = sched
                .pool
                .insert(media_time, adjusted, callback)
                .inspect_err(|e| {
                    tracing::warn!(clock = %shared.name, error = %e, "request dropped");
                    shared.metrics.record_rejected();
                })?;
            tracing::trace!(
                clock = %shared.name,
                request = %id,
                requested = %media_time,
                adjusted,
                available = sched.pool.available(),
                "request queued"
            );
            (id, active.then(|| Arc::clone(&sched.wake)))
        };

        notify(&shared.name, wake);
        Ok(id)
    }

    /// Async form of [`add_request`](Self::add_request).
    ///
    /// The returned future resolves to the service time, or
    /// [`MediaTime::UNKNOWN`] if the request was flushed.
    pub fn request_async(
        &self,
        media_time: MediaTime,
    ) -> Result<impl Future<Output = Result<MediaTime>> + Send + 'static> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.add_request(media_time, move |t| {
            let _ = tx.send(t);
        })?;
        Ok(async move { rx.await.map_err(|_| Error::Shutdown) })
    }

    /// Complete every pending request with [`MediaTime::UNKNOWN`].
    pub fn flush(&self) {
        self.flush_with(MediaTime::UNKNOWN);
    }

    /// Complete every pending request with the given media time.
    ///
    /// Callbacks run on the calling thread. The active state is unchanged.
    pub fn flush_with(&self, result: MediaTime) {
        let guard = self.shared.enter_dispatch();
        let pending = self.shared.lock().take_pending();
        self.run_flushed(&guard, pending, result);
    }

    fn run_flushed(
        &self,
        guard: &DispatchGuard<'_>,
        pending: Vec<requests::Request>,
        result: MediaTime,
    ) {
        if pending.is_empty() {
            return;
        }
        tracing::debug!(
            clock = %self.shared.name,
            count = pending.len(),
            result = %result,
            "flushing requests"
        );
        self.shared.metrics.record_flushed(pending.len());
        guard.run(pending.into_iter().map(|r| Fired::new(r, result)).collect());
    }

    /// Number of requests waiting to be serviced.
    pub fn pending_requests(&self) -> usize {
        self.shared
            .lock()
            .scheduling
            .as_ref()
            .map_or(0, |s| s.pool.len())
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Current media time.
    pub fn media_time(&self) -> MediaTime {
        let now = self.shared.now_us();
        self.shared.lock().base.media_time(now)
    }

    /// Current wall time of the clock's time source, in microseconds.
    pub fn wall_time(&self) -> MediaTime {
        self.shared.source.now().as_wall_micros()
    }

    /// Provide a media-time reference.
    ///
    /// An inactive clock takes it as is. A running clock jumps when the
    /// difference exceeds the upper update threshold, and otherwise only
    /// corrects once the smoothed difference exceeds the lower one. A
    /// paused clock ignores it.
    pub fn set_media_time(&self, reference: MediaTime) -> Result<()> {
        if reference.is_unknown() {
            return Err(Error::InvalidArgument(
                "media time reference is unknown".to_string(),
            ));
        }
        let wake = {
            let mut inner = self.shared.lock();
            let now = self.shared.now_us();
            let outcome = inner.base.set_reference(reference, now);
            tracing::trace!(
                clock = %self.shared.name,
                reference = %reference,
                ?outcome,
                "media time reference"
            );
            if outcome.needs_wake() {
                inner.wake_handle()
            } else {
                None
            }
        };
        notify(&self.shared.name, wake);
        Ok(())
    }

    /// Change the scale. Zero pauses the clock, negative runs it backwards.
    pub fn set_scale(&self, scale: Rational) {
        let wake = {
            let mut inner = self.shared.lock();
            let now = self.shared.now_us();
            let reversed = inner.base.set_scale(scale, now);
            let reverse = inner.base.is_reverse();
            if let Some(sched) = inner.scheduling.as_mut() {
                if reversed {
                    sched.pool.set_reverse(reverse);
                }
            }
            inner.wake_handle()
        };
        tracing::debug!(clock = %self.shared.name, scale = %scale, "scale changed");
        notify(&self.shared.name, wake);
    }

    /// Current scale.
    pub fn scale(&self) -> Rational {
        self.shared.lock().base.scale()
    }

    /// True when the scale is zero.
    pub fn is_paused(&self) -> bool {
        self.shared.lock().base.is_paused()
    }

    /// Start or stop the clock.
    pub fn set_active(&self, active: bool) {
        let (was, wake) = {
            let mut inner = self.shared.lock();
            let now = self.shared.now_us();
            let was = inner.base.is_active();
            inner.base.set_active(active, now);
            (was, inner.wake_handle())
        };
        if was != active {
            let label = |a: bool| if a { "active" } else { "inactive" };
            trace_state_change(&self.shared.name, label(was), label(active));
        }
        notify(&self.shared.name, wake);
    }

    /// True when the clock is running.
    pub fn is_active(&self) -> bool {
        self.shared.lock().base.is_active()
    }

    // ========================================================================
    // Thresholds
    // ========================================================================

    /// Current update threshold.
    pub fn update_threshold(&self) -> UpdateThreshold {
        self.shared.lock().base.update_threshold()
    }

    /// Replace the update threshold.
    pub fn set_update_threshold(&self, threshold: UpdateThreshold) {
        tracing::trace!(
            clock = %self.shared.name,
            lower = %threshold.lower,
            upper = %threshold.upper,
            "update threshold"
        );
        self.shared.lock().base.set_update_threshold(threshold);
    }

    /// Current discontinuity threshold.
    pub fn discontinuity_threshold(&self) -> DiscontinuityThreshold {
        self.shared.lock().discontinuity
    }

    /// Replace the discontinuity threshold.
    pub fn set_discontinuity_threshold(&self, threshold: DiscontinuityThreshold) {
        tracing::trace!(
            clock = %self.shared.name,
            threshold = %threshold.threshold,
            duration = %threshold.duration,
            "discontinuity threshold"
        );
        self.shared.lock().discontinuity = threshold;
    }

    /// Current request threshold.
    pub fn request_threshold(&self) -> RequestThreshold {
        self.shared.lock().request_threshold
    }

    /// Replace the request threshold.
    pub fn set_request_threshold(&self, threshold: RequestThreshold) {
        tracing::trace!(
            clock = %self.shared.name,
            threshold = %threshold.threshold,
            enabled = threshold.enabled,
            "request threshold"
        );
        self.shared.lock().request_threshold = threshold;
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop the scheduler and flush pending requests with
    /// [`MediaTime::UNKNOWN`].
    ///
    /// Idempotent, and run automatically on drop. Time queries keep working
    /// afterwards; new requests fail with [`Error::Shutdown`].
    pub fn destroy(&self) {
        let scheduling = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.scheduling.take()
        };
        let Some(mut scheduling) = scheduling else {
            tracing::debug!(clock = %self.shared.name, "clock destroyed");
            return;
        };

        notify(&self.shared.name, Some(Arc::clone(&scheduling.wake)));
        // Inside a callback of this clock the dispatch lock is held, and the
        // worker may be waiting for it. It exits on its own once released.
        let on_worker = scheduling.worker_thread() == Some(std::thread::current().id());
        let detach = on_worker || self.shared.is_dispatching();
        if let Some(worker) = scheduling.worker.take() {
            if detach {
                tracing::debug!(clock = %self.shared.name, "destroyed from a callback, not joining");
            } else if worker.join().is_err() {
                tracing::error!(clock = %self.shared.name, "scheduler thread panicked");
            }
        }

        let guard = self.shared.enter_dispatch();
        let pending = scheduling.pool.drain();
        self.run_flushed(&guard, pending, MediaTime::UNKNOWN);
        drop(guard);

        tracing::debug!(clock = %self.shared.name, "clock destroyed");
    }

    /// True once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaClock {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("MediaClock")
            .field("name", &self.shared.name)
            .field("active", &inner.base.is_active())
            .field("scale", &inner.base.scale())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockTime, ManualClock};
    use crate::timer::ThreadTimerBackend;
    use std::sync::mpsc;
    use std::time::Duration;

    fn us(v: i64) -> MediaTime {
        MediaTime::from_micros(v)
    }

    fn manual_clock() -> (Arc<ManualClock>, MediaClock) {
        let source = Arc::new(ManualClock::starting_at(ClockTime::from_secs(10)));
        let clock = MediaClock::with_config(
            ClockConfig::default()
                .with_name("test")
                .with_time_source(source.clone()),
        )
        .unwrap();
        (source, clock)
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            MediaClock::with_config(ClockConfig::default().with_request_slots(0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(MediaClock::with_config(ClockConfig::default().with_lead_time_us(-1)).is_err());
    }

    #[test]
    fn test_pool_allocation_failure() {
        let clock =
            MediaClock::with_config(ClockConfig::default().with_request_slots(usize::MAX)).unwrap();
        let err = clock.add_request(us(0), |_| {}).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory));
        assert_eq!(clock.pending_requests(), 0);

        // Time keeping is unaffected
        clock.set_media_time(us(42)).unwrap();
        assert_eq!(clock.media_time(), us(42));
    }

    #[test]
    fn test_media_time_follows_wall_time() {
        let (source, clock) = manual_clock();
        clock.set_media_time(us(1_000_000)).unwrap();
        clock.set_active(true);

        source.advance(Duration::from_millis(25));
        assert_eq!(clock.media_time(), us(1_025_000));

        clock.set_scale(Rational::new(1, 2).unwrap());
        source.advance(Duration::from_millis(20));
        assert_eq!(clock.media_time(), us(1_035_000));

        clock.set_scale(Rational::ZERO);
        assert!(clock.is_paused());
        source.advance(Duration::from_secs(1));
        assert_eq!(clock.media_time(), us(1_035_000));
    }

    #[test]
    fn test_inactive_clock_is_frozen() {
        let (source, clock) = manual_clock();
        clock.set_media_time(us(500)).unwrap();
        source.advance(Duration::from_secs(3));
        assert_eq!(clock.media_time(), us(500));
        assert!(!clock.is_active());
    }

    #[test]
    fn test_scale_round_trip() {
        let clock = MediaClock::new();
        let scale = Rational::new(-3, 4).unwrap();
        clock.set_scale(scale);
        assert_eq!(clock.scale(), scale);
        assert!(Rational::new(1, 0).is_err());
    }

    #[test]
    fn test_unknown_times_rejected() {
        let clock = MediaClock::new();
        assert!(matches!(
            clock.set_media_time(MediaTime::UNKNOWN),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            clock.add_request(MediaTime::UNKNOWN, |_| {}),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_request_threshold_rejects() {
        let (_source, clock) = manual_clock();
        clock.set_media_time(us(0)).unwrap();
        clock.set_request_threshold(RequestThreshold::enabled(us(100_000)));

        let err = clock.add_request(us(200_000), |_| {}).unwrap_err();
        match err {
            Error::Rejected { requested, limit } => {
                assert_eq!(requested, us(200_000));
                assert_eq!(limit, us(100_000));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(clock.pending_requests(), 0);

        // At the limit is accepted
        clock.add_request(us(100_000), |_| {}).unwrap();
        assert_eq!(clock.pending_requests(), 1);
    }

    #[test]
    fn test_pool_exhaustion() {
        let clock = MediaClock::with_config(ClockConfig::default().with_request_slots(2)).unwrap();
        clock.add_request(us(10), |_| {}).unwrap();
        clock.add_request(us(20), |_| {}).unwrap();
        let err = clock.add_request(us(30), |_| {}).unwrap_err();
        assert!(matches!(err, Error::OutOfResources(_)));
        assert_eq!(clock.pending_requests(), 2);
    }

    #[test]
    fn test_flush_completes_with_unknown() {
        let clock = MediaClock::new();
        let (tx, rx) = mpsc::channel();
        for t in [30, 10, 20] {
            let tx = tx.clone();
            clock.add_request(us(t), move |r| tx.send((t, r)).unwrap()).unwrap();
        }
        clock.flush();
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                (10, MediaTime::UNKNOWN),
                (20, MediaTime::UNKNOWN),
                (30, MediaTime::UNKNOWN)
            ]
        );
        assert_eq!(clock.pending_requests(), 0);
        assert!(!clock.is_active());
    }

    #[test]
    fn test_flush_with_time() {
        let clock = MediaClock::new();
        let (tx, rx) = mpsc::channel();
        clock.add_request(us(5), move |r| tx.send(r).unwrap()).unwrap();
        clock.flush_with(us(42));
        assert_eq!(rx.try_recv().unwrap(), us(42));
    }

    #[test]
    fn test_destroy_flushes_and_is_idempotent() {
        let clock = MediaClock::new();
        let (tx, rx) = mpsc::channel();
        clock.add_request(us(1_000), move |r| tx.send(r).unwrap()).unwrap();
        clock.destroy();
        assert_eq!(rx.try_recv().unwrap(), MediaTime::UNKNOWN);
        assert!(clock.is_destroyed());
        clock.destroy();
        assert!(matches!(
            clock.add_request(us(1), |_| {}),
            Err(Error::Shutdown)
        ));
    }

    #[test]
    fn test_request_fires_on_worker() {
        let clock = MediaClock::with_config(
            ClockConfig::default().with_timer_backend(Arc::new(ThreadTimerBackend::default())),
        )
        .unwrap();
        clock.set_media_time(us(0)).unwrap();
        clock.set_active(true);

        let (tx, rx) = mpsc::channel();
        clock.add_request(us(5_000), move |r| tx.send(r).unwrap()).unwrap();
        let serviced = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(serviced.is_known());
        assert!(serviced >= us(5_000 - 20 - ThreadTimerBackend::DEFAULT_RESOLUTION_US));
    }

    #[test]
    fn test_reentrant_flush_from_callback() {
        let clock = Arc::new(MediaClock::new());
        clock.set_media_time(us(0)).unwrap();
        clock.set_active(true);

        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        // Far in the future, flushed from the first callback
        clock
            .add_request(us(60_000_000), move |r| tx2.send(("late", r)).unwrap())
            .unwrap();
        let inner = Arc::clone(&clock);
        clock
            .add_request(us(0), move |r| {
                tx.send(("first", r)).unwrap();
                inner.flush();
            })
            .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.0, "first");
        let late = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(late, ("late", MediaTime::UNKNOWN));
    }

    #[test]
    fn test_thresholds_round_trip() {
        let clock = MediaClock::new();
        let update = UpdateThreshold::new(us(1_000), us(2_000));
        clock.set_update_threshold(update);
        assert_eq!(clock.update_threshold(), update);

        let discont = DiscontinuityThreshold::new(us(3_000), us(4_000));
        clock.set_discontinuity_threshold(discont);
        assert_eq!(clock.discontinuity_threshold(), discont);

        let request = RequestThreshold::enabled(us(5_000));
        clock.set_request_threshold(request);
        assert_eq!(clock.request_threshold(), request);
    }
}
