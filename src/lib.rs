//! # mediaclock
//!
//! An adjustable media clock for multimedia pipelines, with media-time
//! request scheduling and multi-stream synchronization.
//!
//! ## Features
//!
//! - **Media clock**: wall time mapped to media time at a signed rational
//!   scale, with hysteresis on external references
//! - **Scheduling**: callbacks fired when the media time reaches a
//!   requested value, from a fixed request pool and a per-clock worker
//! - **Synchronization**: per-stream offset statistics driving restarts and
//!   damped soft corrections of the clocks
//! - **Linux-optimized**: eventfd wake-ups and timerfd timers, with portable
//!   fallbacks
//!
//! ## Quick Start
//!
//! ```rust
//! use mediaclock::prelude::*;
//! use std::sync::Arc;
//!
//! // A clock the adjustment engine drives
//! let clock = Arc::new(MediaClock::new());
//! let mut adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
//! adjuster.attach(Arc::clone(&clock));
//! let controller = ClockController::spawn(adjuster).unwrap();
//!
//! // Report when data arrived and the media time it claims
//! let now = clock.wall_time();
//! controller
//!     .report_sample(1, now, now + MediaTime::from_millis(100))
//!     .unwrap();
//! controller.sync().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod format;
pub mod media_clock;
pub mod observability;
pub mod rational;
pub mod stats;
pub mod sync;
pub mod timer;
pub mod wake;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ClockTime, ManualClock, MediaTime, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::format::Framerate;
    pub use crate::media_clock::{
        ClockConfig, DiscontinuityThreshold, MediaClock, RequestId, RequestThreshold,
        UpdateThreshold,
    };
    pub use crate::rational::Rational;
    pub use crate::stats::{StreamEvent, StreamId};
    pub use crate::sync::{AdjusterConfig, ClockAdjuster, ClockController, LatencyTarget};
}

pub use error::{Error, Result};
