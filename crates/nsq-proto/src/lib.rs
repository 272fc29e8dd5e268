//! nsq-proto - wire protocol types for NSQ.
//!
//! This crate knows the NSQ TCP protocol end to end — the magic identifier,
//! commands, the IDENTIFY handshake payload, and the frame envelope brokers
//! reply with — but it does not open a socket. `nsq-client` drives an actual
//! connection using these types.

pub mod command;
pub mod error;
pub mod frame;
pub mod identify;

pub use command::MAGIC;
pub use error::FrameError;
pub use frame::{Frame, MessageFrame, NsqCodec, HEARTBEAT, OK};
pub use identify::{IdentifyOptions, IdentifyResponse};
