//! Error types for the codec and the socket transport.

use std::io;
use std::path::PathBuf;

/// Error encoding or decoding a message against a byte slice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("invalid access kind {0:#04x}")]
    InvalidAccessKind(u8),
    #[error("invalid memory policy mode {0}")]
    InvalidPolicyMode(u8),
    #[error("declared length {0} is shorter than the message header")]
    LengthTooShort(u64),
    /// The payload ended somewhere other than where the header said it would.
    #[error("declared length {declared} but payload occupies {consumed} bytes")]
    FrameMismatch { declared: u64, consumed: u64 },
}

impl CodecError {
    /// True when the bytes disagree with their own `total_length`.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CodecError::BufferTooSmall { .. }
                | CodecError::LengthTooShort(_)
                | CodecError::FrameMismatch { .. }
        )
    }
}

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket creation, bind, listen, accept or connect failed.
    #[error("{stage} failed on {}: {source}", .path.display())]
    Setup {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    /// Non-blocking receive found nothing to read.
    #[error("operation would block")]
    WouldBlock,
    #[error("declared message length {declared} exceeds buffer capacity {capacity}")]
    LengthExceeded { declared: u64, capacity: usize },
    #[error("declared message length {declared} does not match expected {expected}")]
    LengthMismatch { expected: u64, declared: u64 },
    #[error("protocol desynchronized: expected type id {expected}, got {got}")]
    Desynchronized { expected: u8, got: u8 },
    /// A previous framing error left the receive side unusable.
    #[error("receive side poisoned by an earlier framing error")]
    Poisoned,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl Error {
    /// True for the polling miss of a non-blocking receive.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }

    pub(crate) fn setup(stage: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Setup {
            stage,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
