//! Multi-stream synchronization.
//!
//! - [`ClockAdjuster`]: the adjustment engine, driven from one thread
//! - [`ClockController`]: runs an adjuster on its own thread behind a
//!   bounded event queue

mod adjuster;
mod controller;

pub use adjuster::{
    AdjusterConfig, Adjustment, ClockAdjuster, DEFAULT_CONFIDENCE_DIVISOR_LOG2,
    DEFAULT_LATENCY_TARGET_US, DEFAULT_MIN_ELIGIBLE_STREAMS, LatencyTarget,
};
pub use controller::{ClockController, DEFAULT_EVENT_QUEUE};
