//! Timing statistics for input streams.
//!
//! - [`SampleFilter`]: sliding window with a running sum, used both as a
//!   moving average and as an approximate standard deviation.
//! - [`StreamTracker`]: per-stream (wall, media) history that classifies
//!   samples into [`StreamEvent`]s and feeds the filters.

mod filter;
mod stream;

pub use filter::SampleFilter;
pub use stream::{StreamEvent, StreamId, StreamTracker};
