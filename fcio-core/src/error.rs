//! Error types for FCIO stream decoding.

use thiserror::Error;

/// Errors that can occur while reading and decoding an FCIO stream.
#[derive(Error, Debug)]
pub enum FcioError {
    /// The data source could not be opened or connected.
    #[error("cannot open {endpoint}: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// No data arrived within the configured timeout.
    #[error("no data within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The source is exhausted and cannot grow.
    #[error("unexpected end of stream")]
    Eof,

    /// Malformed tag, length or count fields. The stream is no longer trustworthy.
    #[error("framing error: {0}")]
    Framing(String),

    /// Records arrived in an order the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The requested field is not carried by this record.
    #[error("layout error: {0}")]
    Layout(String),

    /// Lower-level transport fault.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FcioError {
    /// Returns true if the stream cannot be read any further after this error.
    ///
    /// `Timeout` and `Layout` errors are local: the caller may retry the read
    /// or keep using the stream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Open { .. } | Self::Framing(_) | Self::Protocol(_) | Self::Io(_)
        )
    }

    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

/// Result type alias using [`FcioError`].
pub type Result<T> = std::result::Result<T, FcioError>;
