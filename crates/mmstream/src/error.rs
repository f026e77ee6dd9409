use std::io;

use config::ConfigError;
use thiserror::Error;

/// Errors surfaced by mapped stream operations.
///
/// Running out of slices after a write has grown the stream is not in this
/// list: that is a logic defect and panics instead of returning.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A position, length or count lies outside what the stream allows.
    #[error("{what} {value} not within [0..={limit}]")]
    Range {
        /// Which argument was rejected.
        what: &'static str,
        /// The rejected value.
        value: u64,
        /// The inclusive upper bound in force at the time.
        limit: u64,
    },

    /// The platform refused to map a byte range of the file.
    #[error("failed to map {len} bytes at offset {offset}: {source}")]
    Map {
        /// Absolute file offset of the requested range.
        offset: u64,
        /// Length of the requested range.
        len: u64,
        #[source]
        source: io::Error,
    },

    /// An underlying I/O error (resize, sync, metadata).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stream (or this handle to it) has been closed.
    #[error("stream closed")]
    Closed,

    /// A write-side operation was attempted on a read-only mapping.
    #[error("stream is mapped read-only")]
    ReadOnly,

    /// `reset()` was called without a valid mark.
    #[error("mark not set")]
    MarkNotSet,

    /// The stream has no file resize operation registered.
    #[error("file size change not supported")]
    ResizeUnsupported,

    /// The resize op reported success but the file did not reach the
    /// requested length.
    #[error("resize op left the file at {actual} bytes, requested {requested}")]
    ResizeShort {
        /// Length passed to the resize op.
        requested: u64,
        /// Length the file actually has afterwards.
        actual: u64,
    },

    /// A resize operation is already registered on this stream.
    #[error("file resize operation already set")]
    ResizeOpAlreadySet,

    /// A stream was asked to copy from itself.
    #[error("cannot copy a stream onto itself")]
    SelfCopy,

    /// The construction options are invalid.
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

impl StreamError {
    pub(crate) fn range(what: &'static str, value: u64, limit: u64) -> Self {
        StreamError::Range { what, value, limit }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => e,
            StreamError::Range { .. } | StreamError::SelfCopy | StreamError::Config(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            StreamError::Closed => io::Error::new(io::ErrorKind::NotConnected, err),
            StreamError::ReadOnly => io::Error::new(io::ErrorKind::PermissionDenied, err),
            StreamError::ResizeUnsupported => io::Error::new(io::ErrorKind::Unsupported, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
