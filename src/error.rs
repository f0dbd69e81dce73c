//! Error types for the media clock.

use crate::clock::MediaTime;
use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media clock operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Memory allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A fixed pool or queue is exhausted, or a scheduling resource
    /// (timer, wake signal, worker thread) could not be created.
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// A malformed argument was supplied (e.g. a zero-denominator scale).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request lies further in the future than the request threshold allows.
    #[error("request for {requested} rejected: beyond threshold limit {limit}")]
    Rejected {
        /// Media time the client asked for.
        requested: MediaTime,
        /// Latest media time accepted at the moment of the request.
        limit: MediaTime,
    },

    /// Not enough statistics to make an adjustment decision.
    #[error("insufficient statistics")]
    NotReady,

    /// The clock or controller has been shut down.
    #[error("clock has been shut down")]
    Shutdown,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Returns true for errors that signal resource exhaustion.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Error::OutOfMemory | Error::OutOfResources(_))
    }
}
