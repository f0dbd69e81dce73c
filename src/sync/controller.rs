//! Message-passing front end for the adjustment engine.
//!
//! [`ClockController`] moves a [`ClockAdjuster`] onto its own thread and
//! feeds it through a bounded channel, so producers on any thread can
//! report samples without sharing the engine.

use super::adjuster::{ClockAdjuster, LatencyTarget};
use crate::clock::MediaTime;
use crate::error::{Error, Result};
use crate::format::Framerate;
use crate::media_clock::{DiscontinuityThreshold, RequestThreshold, UpdateThreshold};
use crate::observability::{record_event_queue_depth, span_adjuster};
use crate::rational::Rational;
use crate::stats::StreamId;
use kanal::{Receiver, Sender, bounded};
use std::thread::JoinHandle;

/// Default number of events that may wait for the adjustment thread.
pub const DEFAULT_EVENT_QUEUE: usize = 16;

/// Work item for the adjustment thread.
enum ClockEvent {
    Sample {
        stream: StreamId,
        wall: MediaTime,
        media: MediaTime,
    },
    RemoveStream(StreamId),
    Discontinuity,
    Scale(Rational),
    Latency(LatencyTarget),
    FrameRate(Framerate),
    UpdateThreshold(UpdateThreshold),
    DiscontinuityThreshold(DiscontinuityThreshold),
    RequestThreshold(RequestThreshold),
    Sync(Sender<()>),
    Shutdown,
}

/// Runs a [`ClockAdjuster`] on a dedicated thread.
///
/// Submitting never blocks: a full queue fails with
/// [`Error::OutOfResources`]. Dropping the controller stops the thread after
/// the queued events have been processed.
///
/// # Example
///
/// ```rust
/// use mediaclock::clock::MediaTime;
/// use mediaclock::sync::{AdjusterConfig, ClockAdjuster, ClockController};
///
/// let adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
/// let controller = ClockController::spawn(adjuster).unwrap();
///
/// controller
///     .report_sample(1, MediaTime::from_micros(0), MediaTime::from_micros(40_000))
///     .unwrap();
/// controller.sync().unwrap();
/// ```
pub struct ClockController {
    name: String,
    sender: Sender<ClockEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ClockController {
    /// Start the adjustment thread with the default queue size.
    pub fn spawn(adjuster: ClockAdjuster) -> Result<Self> {
        Self::with_queue_capacity(adjuster, DEFAULT_EVENT_QUEUE)
    }

    /// Start the adjustment thread with room for `capacity` pending events.
    pub fn with_queue_capacity(adjuster: ClockAdjuster, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "event queue needs at least one slot".to_string(),
            ));
        }
        let name = adjuster.name().to_string();
        let (sender, receiver) = bounded(capacity);

        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(format!("{}-adjust", name))
            .spawn(move || run_adjuster(thread_name, adjuster, receiver))
            .map_err(|e| Error::OutOfResources(format!("adjustment thread: {}", e)))?;

        Ok(Self {
            name,
            sender,
            thread: Some(thread),
        })
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, event: ClockEvent) -> Result<()> {
        match self.sender.try_send(event) {
            Ok(true) => {
                record_event_queue_depth(&self.name, self.sender.len());
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(controller = %self.name, "event queue full");
                Err(Error::OutOfResources("event queue full".to_string()))
            }
            Err(_) => Err(Error::Shutdown),
        }
    }

    /// Report that data claiming `media` time arrived on `stream` at wall
    /// time `wall`.
    pub fn report_sample(&self, stream: StreamId, wall: MediaTime, media: MediaTime) -> Result<()> {
        self.submit(ClockEvent::Sample {
            stream,
            wall,
            media,
        })
    }

    /// Forget a stream.
    pub fn remove_stream(&self, stream: StreamId) -> Result<()> {
        self.submit(ClockEvent::RemoveStream(stream))
    }

    /// Restart the clocks on the next adjustment.
    pub fn signal_discontinuity(&self) -> Result<()> {
        self.submit(ClockEvent::Discontinuity)
    }

    /// Change the playback scale.
    pub fn set_scale(&self, scale: Rational) -> Result<()> {
        self.submit(ClockEvent::Scale(scale))
    }

    /// Change the latency target.
    pub fn set_latency(&self, latency: LatencyTarget) -> Result<()> {
        self.submit(ClockEvent::Latency(latency))
    }

    /// Change the nominal frame rate.
    ///
    /// Validated here so an invalid rate is reported to the caller.
    pub fn set_frame_rate(&self, frame_rate: Framerate) -> Result<()> {
        self.submit(ClockEvent::FrameRate(frame_rate.validate()?))
    }

    /// Change the update threshold of the clocks.
    pub fn set_update_threshold(&self, threshold: UpdateThreshold) -> Result<()> {
        self.submit(ClockEvent::UpdateThreshold(threshold))
    }

    /// Change the discontinuity threshold.
    pub fn set_discontinuity_threshold(&self, threshold: DiscontinuityThreshold) -> Result<()> {
        self.submit(ClockEvent::DiscontinuityThreshold(threshold))
    }

    /// Change the request threshold of the clocks.
    pub fn set_request_threshold(&self, threshold: RequestThreshold) -> Result<()> {
        self.submit(ClockEvent::RequestThreshold(threshold))
    }

    /// Block until every event submitted before this call has been
    /// processed.
    pub fn sync(&self) -> Result<()> {
        let (tx, rx) = bounded(1);
        // Waits for room rather than failing on a full queue
        self.sender
            .send(ClockEvent::Sync(tx))
            .map_err(|_| Error::Shutdown)?;
        rx.recv().map_err(|_| Error::Shutdown)
    }

    /// Number of events waiting for the adjustment thread.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Stop the adjustment thread after it drains the queue.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.sender.send(ClockEvent::Shutdown).is_err() {
            tracing::debug!(controller = %self.name, "adjustment thread already gone");
        }
        if thread.join().is_err() {
            tracing::error!(controller = %self.name, "adjustment thread panicked");
        }
    }
}

impl Drop for ClockController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ClockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockController")
            .field("name", &self.name)
            .field("queued", &self.sender.len())
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn run_adjuster(name: String, mut adjuster: ClockAdjuster, receiver: Receiver<ClockEvent>) {
    let span = span_adjuster(&name);
    let _enter = span.enter();
    tracing::debug!("adjustment thread started");

    while let Ok(event) = receiver.recv() {
        match event {
            ClockEvent::Sample {
                stream,
                wall,
                media,
            } => {
                adjuster.process_sample(stream, wall, media);
            }
            ClockEvent::RemoveStream(stream) => {
                adjuster.remove_stream(stream);
            }
            ClockEvent::Discontinuity => adjuster.signal_discontinuity(),
            ClockEvent::Scale(scale) => adjuster.set_scale(scale),
            ClockEvent::Latency(latency) => adjuster.set_latency(latency),
            ClockEvent::FrameRate(frame_rate) => {
                if let Err(e) = adjuster.set_frame_rate(frame_rate) {
                    tracing::warn!(error = %e, "frame rate rejected");
                }
            }
            ClockEvent::UpdateThreshold(t) => adjuster.set_update_threshold(t),
            ClockEvent::DiscontinuityThreshold(t) => adjuster.set_discontinuity_threshold(t),
            ClockEvent::RequestThreshold(t) => adjuster.set_request_threshold(t),
            ClockEvent::Sync(ack) => {
                let _ = ack.send(());
            }
            ClockEvent::Shutdown => break,
        }
        record_event_queue_depth(&name, receiver.len());
    }

    tracing::debug!("adjustment thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_clock::MediaClock;
    use crate::sync::AdjusterConfig;
    use std::sync::Arc;

    fn us(v: i64) -> MediaTime {
        MediaTime::from_micros(v)
    }

    #[test]
    fn test_spawn_and_shutdown() {
        let adjuster = ClockAdjuster::new(AdjusterConfig::default().with_name("ctl")).unwrap();
        let mut controller = ClockController::spawn(adjuster).unwrap();
        assert_eq!(controller.name(), "ctl");
        controller.sync().unwrap();
        controller.shutdown();
        controller.shutdown();
        assert!(matches!(controller.report_sample(1, us(0), us(0)), Err(Error::Shutdown)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
        assert!(matches!(
            ClockController::with_queue_capacity(adjuster, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_frame_rate_reported() {
        let adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
        let controller = ClockController::spawn(adjuster).unwrap();
        assert!(controller.set_frame_rate(Framerate::new(0, 1)).is_err());
        controller.set_frame_rate(Framerate::FPS_25).unwrap();
        controller.sync().unwrap();
    }

    #[test]
    fn test_events_reach_clocks() {
        let clock = Arc::new(MediaClock::new());
        let mut adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
        adjuster.attach(Arc::clone(&clock));
        let controller = ClockController::spawn(adjuster).unwrap();

        let threshold = RequestThreshold::enabled(us(250_000));
        controller.set_request_threshold(threshold).unwrap();
        controller.set_scale(Rational::ZERO).unwrap();
        controller.sync().unwrap();

        assert_eq!(clock.request_threshold(), threshold);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_samples_start_clock() {
        let clock = Arc::new(MediaClock::new());
        let mut adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
        adjuster.attach(Arc::clone(&clock));
        let controller = ClockController::spawn(adjuster).unwrap();

        let base = clock.wall_time().as_micros();
        for k in 0..3 {
            let wall = base + k * 33_333;
            controller.report_sample(1, us(wall), us(wall + 100_000)).unwrap();
            controller.report_sample(2, us(wall), us(wall + 110_000)).unwrap();
            controller.sync().unwrap();
        }
        assert!(clock.is_active());
    }
}
