//! nsq-client - a consumer client for NSQ.
//!
//! Build a [`Reader`] for a topic/channel pair (sourced from a mix of
//! `nsqlookupd` discovery and statically configured nsqd addresses), then
//! iterate [`Reader::into_stream`] for messages. Each [`Message`] carries
//! its own [`Message::fin`]/[`Message::req`]/[`Message::touch`].
//!
//! ```no_run
//! use futures::StreamExt;
//! use nsq_client::{ClientOptions, Reader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ClientOptions {
//!     lookupd_http_addresses: vec!["http://127.0.0.1:4161".to_string()],
//!     ..Default::default()
//! };
//! let reader = Reader::new(options, "events".to_string(), "consumer-a".to_string(), 100).await?;
//! let mut messages = Box::pin(reader.into_stream());
//! while let Some(message) = messages.next().await {
//!     message.fin().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod reader;

pub use client::{Client, ClientHandle, ClientOptions};
pub use connection::{Connection, ConnectionState};
pub use discovery::Discovery;
pub use endpoint::Endpoint;
pub use error::{ConfigError, ConnectionError, ReaderError};
pub use message::Message;
pub use reader::Reader;
