//! Protocol-level errors.

/// Failures while decoding bytes off the wire into a [`crate::frame::Frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame size: {0}")]
    InvalidFrameSize(i32),

    #[error("unknown frame type: {0}")]
    UnknownFrameType(i32),

    #[error("message frame too short: expected at least {expected} bytes, got {actual}")]
    ShortMessageFrame { expected: usize, actual: usize },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
