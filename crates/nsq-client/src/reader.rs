//! Subscribes a [`Client`]'s connections to a channel and distributes RDY
//! credit fairly across them, exposing the result as a message [`Stream`].

use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use nsq_proto::Frame;
use tracing::{debug, warn};

use crate::client::{Client, ClientOptions};
use crate::error::{ConfigError, ReaderError};
use crate::message::Message;

/// How long a single `Client::read()` call may block before `Reader::read()`
/// returns control to its caller to re-check `needs_distribute_ready`.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A consumer of one topic/channel pair.
pub struct Reader {
    client: Client,
    topic: String,
    channel: String,
    max_in_flight: u32,
}

impl Reader {
    pub async fn new(
        mut options: ClientOptions,
        topic: String,
        channel: String,
        max_in_flight: u32,
    ) -> Result<Self, ConfigError> {
        if topic.is_empty() || channel.is_empty() {
            return Err(ConfigError::MissingTopicOrChannel);
        }
        options.topic = topic.clone();
        let client = Client::new(options).await?;
        let mut reader = Self {
            client,
            topic,
            channel,
            max_in_flight,
        };
        reader.subscribe_new_connections().await;
        Ok(reader)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `SUB` every connection that doesn't have a channel subscription yet,
    /// then grant it `RDY 1` so it can receive its first message before the
    /// next fair-distribution pass runs.
    async fn subscribe_new_connections(&mut self) {
        for endpoint in self.client.connections() {
            let Some(handle) = self.client.connection_handle(&endpoint) else {
                continue;
            };
            let mut conn = handle.lock().await;
            if conn.ready() > 0 || conn.last_ready_sent() > 0 {
                continue;
            }
            let sub = conn.sub(&self.topic, &self.channel);
            if let Err(e) = conn.send_now(sub).await {
                warn!(%endpoint, error = %e, "SUB failed");
                continue;
            }
            let rdy = conn.set_ready(1);
            if let Err(e) = conn.send_now(rdy).await {
                warn!(%endpoint, error = %e, "initial RDY failed");
            }
        }
    }

    /// True iff any live connection has depleted its credit (`ready <= 0`) or
    /// drifted down to a low watermark (`ready <= max(1, last_ready_sent /
    /// 4)`). False when no connections are alive.
    pub async fn needs_distribute_ready(&self) -> bool {
        let live = self.client.live_connections();
        if live.is_empty() {
            return false;
        }
        for endpoint in &live {
            let Some(handle) = self.client.connection_handle(endpoint) else {
                continue;
            };
            let conn = handle.lock().await;
            let low_watermark = (conn.last_ready_sent() / 4).max(1) as i64;
            if conn.ready() <= 0 || conn.ready() <= low_watermark {
                return true;
            }
        }
        false
    }

    /// Fairly split `max_in_flight` across every live connection.
    ///
    /// Endpoints are sorted (host, then port) and the first `max_in_flight %
    /// n` in that order receive `base + 1`; the rest receive `base`. Each
    /// value is clamped to that connection's own `max_rdy_count`. The result
    /// is deterministic for identical inputs.
    pub async fn distribute_ready(&mut self) -> Result<(), ReaderError> {
        let mut live = self.client.live_connections();
        live.sort();

        if self.max_in_flight < live.len() as u32 {
            return Err(ReaderError::InsufficientInFlightBudget {
                max_in_flight: self.max_in_flight,
                live: live.len(),
            });
        }

        if live.is_empty() {
            return Ok(());
        }

        let n = live.len() as u32;
        let base = self.max_in_flight / n;
        let remainder = self.max_in_flight % n;

        for (i, endpoint) in live.iter().enumerate() {
            let share = if (i as u32) < remainder { base + 1 } else { base };
            let Some(handle) = self.client.connection_handle(endpoint) else {
                continue;
            };
            let mut conn = handle.lock().await;
            let target = share.min(conn.max_rdy_count());
            let rdy = conn.set_ready(target);
            if let Err(e) = conn.send_now(rdy).await {
                warn!(%endpoint, error = %e, "RDY distribution failed");
            }
        }

        Ok(())
    }

    /// One pass: subscribe any newly connected endpoints, redistribute RDY
    /// if due, then pull whatever frames the fleet has ready. Non-message
    /// frames (pass-through protocol errors) are logged and skipped — only
    /// `Message`s are meaningful to a caller iterating this as a stream.
    async fn read(&mut self) -> Vec<Message> {
        self.subscribe_new_connections().await;
        if self.needs_distribute_ready().await {
            if let Err(e) = self.distribute_ready().await {
                warn!(error = %e, "RDY distribution skipped");
            }
        }

        let handle = self.client.downgrade();
        let mut messages = Vec::new();
        for (endpoint, frame) in self.client.read(READ_TIMEOUT).await {
            match frame {
                Frame::Message(frame) => {
                    if let Some(conn_handle) = self.client.connection_handle(&endpoint) {
                        conn_handle.lock().await.note_message_delivered();
                    }
                    messages.push(Message::new(frame, endpoint, handle.clone()));
                }
                other => {
                    debug!(%endpoint, frame = ?other, "skipping non-message frame");
                }
            }
        }
        messages
    }

    /// An infinite stream of messages. Iterating it never blocks
    /// indefinitely — each pull is bounded by `READ_TIMEOUT` internally and
    /// simply yields nothing for that tick when no message arrived.
    pub fn into_stream(mut self) -> impl Stream<Item = Message> {
        stream! {
            loop {
                for message in self.read().await {
                    yield message;
                }
            }
        }
    }
}
