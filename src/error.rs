use thiserror::Error;

/// Everything that can go wrong while decoding a `.nettrace` stream.
///
/// Every fatal variant carries the absolute byte position in the stream at
/// which the problem was detected, so callers can correlate failures with a
/// hex dump.
#[derive(Debug, Error)]
pub enum NettraceError {
    #[error("malformed .nettrace stream at byte {pos}: {message}")]
    MalformedFormat { pos: u64, message: String },

    /// The byte source closed before the terminating null reference tag was
    /// seen. Only ever constructed once the pipe has truly ended; a
    /// mid-stream shortage is handled internally by retrying, never
    /// surfaced as this error.
    #[error("truncated .nettrace stream at byte {pos}")]
    TruncatedStream { pos: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NettraceError {
    pub(crate) fn malformed(pos: u64, message: impl Into<String>) -> Self {
        NettraceError::MalformedFormat {
            pos,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NettraceError>;
