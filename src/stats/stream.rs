//! Per-stream timing statistics.

use super::filter::SampleFilter;
use crate::clock::MediaTime;

/// Identifier of an input stream, chosen by the caller.
pub type StreamId = u32;

/// Classification of one timing sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Nothing of interest (unknown timestamp, or more data for the same frame).
    None,
    /// First sample of the stream.
    Started,
    /// The sample jumped further than the discontinuity threshold.
    Discontinuous,
    /// A frame finished; the statistics were refreshed.
    FrameComplete,
}

/// Running timing state of one input stream.
///
/// The tracker remembers the last (wall, media) pair seen on the stream.
/// When a sample with a new media time arrives, the previous frame is
/// complete and its offset `media - wall` is folded into the filters.
#[derive(Clone, Debug)]
pub struct StreamTracker {
    id: StreamId,
    started: bool,
    last_wall: i64,
    last_media: i64,
    offset: i64,
    offset_avg: i64,
    offset_dev: i64,
    avg_filter: SampleFilter,
    dev_filter: SampleFilter,
}

impl StreamTracker {
    /// Create an idle tracker with filters of `filter_length` samples.
    pub fn new(id: StreamId, filter_length: usize) -> Self {
        Self {
            id,
            started: false,
            last_wall: 0,
            last_media: 0,
            offset: 0,
            offset_avg: 0,
            offset_dev: 0,
            avg_filter: SampleFilter::new(filter_length),
            dev_filter: SampleFilter::new(filter_length),
        }
    }

    /// Classify a sample and fold it into the statistics.
    ///
    /// A discontinuous sample leaves the tracker untouched.
    pub fn update(
        &mut self,
        wall: MediaTime,
        media: MediaTime,
        discontinuity_threshold: MediaTime,
    ) -> StreamEvent {
        if media.is_unknown() || wall.is_unknown() {
            tracing::trace!(stream = self.id, wall = %wall, "ignoring sample without timestamp");
            return StreamEvent::None;
        }
        let wall = wall.as_micros();
        let media = media.as_micros();

        if !self.started {
            tracing::trace!(stream = self.id, wall, media, "stream started");
            self.started = true;
            self.last_wall = wall;
            self.last_media = media;
            return StreamEvent::Started;
        }

        let media_delta = media.saturating_sub(self.last_media);
        let wall_delta = wall.saturating_sub(self.last_wall);
        let threshold = discontinuity_threshold.as_micros().max(0) as u64;

        if media_delta.unsigned_abs() > threshold || wall_delta.unsigned_abs() > threshold {
            tracing::debug!(
                stream = self.id,
                media_delta,
                wall_delta,
                threshold,
                "discontinuity detected"
            );
            return StreamEvent::Discontinuous;
        }

        let mut event = StreamEvent::None;
        if media_delta != 0 {
            self.offset = self.last_media.saturating_sub(self.last_wall);

            self.avg_filter.insert(self.offset);
            self.offset_avg = self.avg_filter.average();

            self.dev_filter
                .insert(self.offset.saturating_sub(self.offset_avg).saturating_abs());
            self.offset_dev = self.dev_filter.average();

            tracing::trace!(
                stream = self.id,
                offset = self.offset,
                avg = self.offset_avg,
                dev = self.offset_dev,
                "frame complete"
            );
            event = StreamEvent::FrameComplete;
        }

        self.last_wall = wall;
        self.last_media = media;
        event
    }

    /// Return to the idle state keeping the filter capacity.
    pub fn reset(&mut self) {
        self.started = false;
        self.last_wall = 0;
        self.last_media = 0;
        self.offset = 0;
        self.offset_avg = 0;
        self.offset_dev = 0;
        self.avg_filter.clear();
        self.dev_filter.clear();
    }

    /// Empty both filters, keeping the last pair and the started flag.
    pub(crate) fn clear_filters(&mut self) {
        self.avg_filter.clear();
        self.dev_filter.clear();
    }

    /// Drop the oldest sample from both filters.
    pub(crate) fn drop_oldest(&mut self) {
        self.avg_filter.drop_oldest();
        self.dev_filter.drop_oldest();
    }

    /// Recompute the smoothed statistics from the filters.
    pub(crate) fn refresh(&mut self) {
        self.offset_avg = self.avg_filter.average();
        self.offset_dev = self.dev_filter.average();
    }

    /// Stream identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// True once the first sample was seen.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Wall time of the last accepted sample (µs).
    pub fn last_wall(&self) -> MediaTime {
        MediaTime::from_micros(self.last_wall)
    }

    /// Media time of the last accepted sample.
    pub fn last_media(&self) -> MediaTime {
        MediaTime::from_micros(self.last_media)
    }

    /// Offset of the last complete frame.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Moving average of the offset.
    pub fn offset_avg(&self) -> i64 {
        self.offset_avg
    }

    /// Approximate standard deviation of the offset.
    pub fn offset_dev(&self) -> i64 {
        self.offset_dev
    }

    /// Offset history window.
    pub fn avg_filter(&self) -> &SampleFilter {
        &self.avg_filter
    }

    /// Deviation history window.
    pub fn dev_filter(&self) -> &SampleFilter {
        &self.dev_filter
    }
}
