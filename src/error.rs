use std::io;
use thiserror::Error;

/// Convenient type alias for `Result<T, RmuxError>`.
pub type Result<T> = std::result::Result<T, RmuxError>;

/// Error types for the rmux library.
///
/// `RmuxError` covers every failure the library reports, from frame codec
/// failures to connection-fatal conditions. Stream-scoped errors never
/// propagate beyond their stream; connection-fatal errors are delivered to
/// every live stream exactly once when the connection is torn down.
#[derive(Debug, Error)]
pub enum RmuxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("MIME type too long: {len} bytes (max: 255)")]
    MimeTypeTooLong { len: usize },

    #[error("resumption is not supported")]
    UnsupportedResumption,

    #[error("application error {code:#06x}: {message}")]
    Application { code: u32, message: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid stream id: {0}")]
    InvalidStreamId(u32),

    #[error("request canceled")]
    Canceled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("keepalive timeout")]
    KeepaliveTimeout,

    #[error("connection error {code:#06x}: {message}")]
    Connection { code: u32, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl RmuxError {
    /// Whether this error tears down the whole connection rather than a
    /// single stream.
    pub fn is_fatal(&self) -> bool {
        match self {
            RmuxError::Io(_)
            | RmuxError::ConnectionClosed
            | RmuxError::KeepaliveTimeout
            | RmuxError::Connection { .. } => true,
            RmuxError::MalformedFrame(_)
            | RmuxError::FrameTooLarge { .. }
            | RmuxError::MimeTypeTooLong { .. }
            | RmuxError::UnsupportedResumption
            | RmuxError::Application { .. }
            | RmuxError::ProtocolViolation(_)
            | RmuxError::InvalidStreamId(_)
            | RmuxError::Canceled
            | RmuxError::Config(_) => false,
        }
    }

    /// Produce the per-stream copy of a fatal error delivered to every live
    /// stream at teardown.
    pub(crate) fn for_stream(&self) -> RmuxError {
        match self {
            RmuxError::KeepaliveTimeout => RmuxError::KeepaliveTimeout,
            RmuxError::Connection { code, message } => RmuxError::Connection {
                code: *code,
                message: message.clone(),
            },
            _ => RmuxError::ConnectionClosed,
        }
    }
}
