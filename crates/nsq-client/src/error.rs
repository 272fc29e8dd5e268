//! Error types returned across the crate's public API.

use nsq_proto::FrameError;

/// Failures opening or operating a single connection to nsqd.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("IDENTIFY handshake failed: {detail}")]
    HandshakeFailed { detail: String },

    #[error(transparent)]
    Framing(#[from] FrameError),

    #[error("nsqd returned a fatal error: {0}")]
    FatalError(String),

    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Construction-time configuration problems.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one of lookupd_http_addresses or nsqd_tcp_addresses is required")]
    NoAddresses,

    #[error("topic and channel are required")]
    MissingTopicOrChannel,
}

/// Errors surfaced while distributing RDY credit or reading messages.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error(
        "max_in_flight ({max_in_flight}) is lower than the number of live connections ({live})"
    )]
    InsufficientInFlightBudget { max_in_flight: u32, live: usize },
}
