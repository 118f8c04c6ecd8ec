use std::io;

use thiserror::Error;

/// Outcome of framework operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the framework core.
///
/// The hook path has no error channel; everything else reports one of
/// these discrete kinds so callers (and the control plane) can map them
/// to stable codes.
#[derive(Debug, Error)]
pub enum Error {
    /// No task with that id, or no inode with that number.
    #[error("not found")]
    NotFound,

    /// Duplicate task name, or bootstrap while already running.
    #[error("already exists")]
    AlreadyExists,

    /// Malformed mask, over-long name, out-of-range index, and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The framework is off; only bootstrap and shutdown are accepted.
    #[error("framework is offline")]
    NotInitialized,

    /// The task table is full.
    #[error("too many registered tasks")]
    Exhausted,
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::NotFound => io::ErrorKind::NotFound,
            Error::AlreadyExists => io::ErrorKind::AlreadyExists,
            Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Error::NotInitialized => io::ErrorKind::NotConnected,
            Error::Exhausted => io::ErrorKind::OutOfMemory,
        };
        io::Error::new(kind, e.to_string())
    }
}
