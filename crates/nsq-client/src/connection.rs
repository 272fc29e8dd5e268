//! A single TCP connection to one nsqd instance.
//!
//! `Connection` owns the socket and its read/write buffers but does not
//! drive its own I/O loop — `Client` polls `readable()`/`writable()` across
//! the whole fleet from one place, per-connection. This type's job is to
//! turn "the socket became readable" into "zero or more decoded frames" and
//! "queue these bytes" into "eventually written," nothing more.

use bytes::{Buf, BytesMut};
use nsq_config::{HandshakeConfig, IdentifyDefaults};
use nsq_proto::{command, frame::decode_frame, Frame, IdentifyOptions, IdentifyResponse};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::ConnectionError;

/// Broker default for `--max-rdy-count` when an IDENTIFY response omits it
/// or hasn't arrived yet.
pub const DEFAULT_MAX_RDY_COUNT: u32 = 2500;

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Identifying,
    Alive,
    Closed,
}

/// One connection's flow-control and socket state.
///
/// Invariant in steady state: `0 <= ready <= last_ready_sent <=
/// max_rdy_count`. `ready` is signed rather than `last_ready_sent`/
/// `max_rdy_count` because a miscounting peer can deliver more messages than
/// the credit it was granted, driving `ready` transiently negative; that is
/// itself one of the signals `Reader::needs_distribute_ready` watches for.
pub struct Connection {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    state: ConnectionState,
    read_buf: BytesMut,
    write_buf: BytesMut,
    ready: i64,
    last_ready_sent: u32,
    max_rdy_count: u32,
}

impl Connection {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: None,
            state: ConnectionState::New,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            ready: 0,
            last_ready_sent: 0,
            max_rdy_count: DEFAULT_MAX_RDY_COUNT,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn alive(&self) -> bool {
        self.state == ConnectionState::Alive
    }

    pub fn ready(&self) -> i64 {
        self.ready
    }

    pub fn last_ready_sent(&self) -> u32 {
        self.last_ready_sent
    }

    pub fn max_rdy_count(&self) -> u32 {
        self.max_rdy_count
    }

    /// True while bytes are queued to write — the multiplexer should poll
    /// this connection's writability until it drains.
    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Dial, send the magic identifier, and complete the `IDENTIFY` handshake.
    pub async fn open(
        &mut self,
        identify_defaults: &IdentifyDefaults,
        handshake: &HandshakeConfig,
    ) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Connecting;
        let addr = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        let stream = tokio::time::timeout(
            Duration::from_millis(handshake.dial_timeout_ms as u64),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(Duration::from_millis(handshake.dial_timeout_ms as u64)))??;
        stream.set_nodelay(true).ok();

        self.state = ConnectionState::Identifying;
        let mut stream = stream;
        stream.write_all(command::MAGIC).await?;

        let options = IdentifyOptions {
            client_id: identify_defaults.client_id.clone(),
            hostname: identify_defaults.client_id.clone(),
            user_agent: identify_defaults.user_agent.clone(),
            heartbeat_interval: identify_defaults.heartbeat_interval_ms as i32,
            output_buffer_size: identify_defaults.output_buffer_size as i32,
            output_buffer_timeout: identify_defaults.output_buffer_timeout_ms as i32,
            ..IdentifyOptions::default()
        };
        stream.write_all(&command::identify(&options)).await?;

        let identify_timeout = Duration::from_millis(handshake.identify_timeout_ms as u64);
        let frame = tokio::time::timeout(identify_timeout, Self::read_one_frame(&mut stream))
            .await
            .map_err(|_| ConnectionError::Timeout(identify_timeout))??;

        match frame {
            Frame::Response(body) => {
                if let Ok(response) = serde_json::from_slice::<IdentifyResponse>(&body) {
                    if response.max_rdy_count > 0 {
                        self.max_rdy_count = response.max_rdy_count as u32;
                    }
                }
                debug!(endpoint = %self.endpoint, "IDENTIFY complete");
            }
            Frame::Error(body) => {
                return Err(ConnectionError::HandshakeFailed {
                    detail: String::from_utf8_lossy(&body).to_string(),
                });
            }
            Frame::Message(_) => {
                return Err(ConnectionError::HandshakeFailed {
                    detail: "nsqd sent a message frame before IDENTIFY completed".to_string(),
                });
            }
        }

        self.stream = Some(stream);
        self.state = ConnectionState::Alive;
        Ok(())
    }

    async fn read_one_frame(stream: &mut TcpStream) -> Result<Frame, ConnectionError> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            if let Some(frame) = decode_frame(&mut buf)? {
                return Ok(frame);
            }
            let n = stream.read_buf(&mut buf).await?;
            if n == 0 {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                )));
            }
        }
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.stream = None;
    }

    /// Wait until the socket has data to read.
    pub async fn readable(&self) -> std::io::Result<()> {
        match &self.stream {
            Some(stream) => stream.readable().await,
            None => std::future::pending().await,
        }
    }

    /// Wait until the socket can accept more writes.
    pub async fn writable(&self) -> std::io::Result<()> {
        match &self.stream {
            Some(stream) => stream.writable().await,
            None => std::future::pending().await,
        }
    }

    /// Try to read once without blocking, append to the read buffer, and
    /// return any frame(s) now fully buffered. `Ok(vec![])` just means no
    /// complete frame is available yet, not an error.
    pub fn try_read_frames(&mut self) -> Result<Vec<Frame>, ConnectionError> {
        let stream = match &self.stream {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let mut chunk = [0u8; READ_CHUNK];
        match stream.try_read(&mut chunk) {
            Ok(0) => Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "nsqd closed the connection",
            ))),
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                self.drain_frames()
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn drain_frames(&mut self) -> Result<Vec<Frame>, ConnectionError> {
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut self.read_buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Queue bytes for writing; does not attempt to write immediately.
    pub fn queue(&mut self, bytes: bytes::Bytes) {
        self.write_buf.extend_from_slice(&bytes);
    }

    /// Try to flush queued bytes without blocking.
    pub fn try_flush(&mut self) -> Result<(), ConnectionError> {
        let stream = match &self.stream {
            Some(s) => s,
            None => return Ok(()),
        };
        while !self.write_buf.is_empty() {
            match stream.try_write(&self.write_buf) {
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Immediately send a command, retrying `try_write` until it drains or
    /// would block (used for the handful of commands the caller issues
    /// synchronously from outside the multiplexer's readiness loop, such as
    /// the initial `SUB`/`RDY` pair on subscribe).
    pub async fn send_now(&mut self, bytes: bytes::Bytes) -> Result<(), ConnectionError> {
        if self.stream.is_none() {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection has no open socket",
            )));
        }
        self.queue(bytes);
        loop {
            self.try_flush()?;
            if !self.has_pending_write() {
                return Ok(());
            }
            self.writable().await?;
        }
    }

    pub fn sub(&self, topic: &str, channel: &str) -> bytes::Bytes {
        command::sub(topic, channel)
    }

    pub fn set_ready(&mut self, count: u32) -> bytes::Bytes {
        let clamped = count.min(self.max_rdy_count);
        self.ready = clamped as i64;
        self.last_ready_sent = clamped;
        command::rdy(clamped)
    }

    /// Account for one message being delivered against this connection's
    /// RDY budget, without issuing any command. A peer that delivers more
    /// messages than it was granted credit for drives this negative rather
    /// than floors at zero — that drift is itself a signal nsq_client::Reader
    /// watches for to trigger a fresh `RDY` redistribution.
    pub fn note_message_delivered(&mut self) {
        self.ready -= 1;
    }

    pub fn fin(&self, id: &[u8; 16]) -> bytes::Bytes {
        command::fin(id)
    }

    pub fn req(&self, id: &[u8; 16], timeout_ms: u32) -> bytes::Bytes {
        command::req(id, timeout_ms)
    }

    pub fn touch(&self, id: &[u8; 16]) -> bytes::Bytes {
        command::touch(id)
    }

    pub fn nop(&self) -> bytes::Bytes {
        command::nop()
    }

    pub fn publish(&self, topic: &str, body: &[u8]) -> bytes::Bytes {
        command::pub_(topic, body)
    }

    pub fn cls(&self) -> bytes::Bytes {
        command::cls()
    }

    /// Tell nsqd this connection is closing cleanly (`CLS`), then tear the
    /// socket down. Best-effort: a write failure during the notice still
    /// results in the connection being closed. A connection with no open
    /// socket (never opened, or already closed) has nowhere to send `CLS`
    /// to, so this degrades to a plain `close()`.
    pub async fn close_gracefully(&mut self) {
        if self.stream.is_some() {
            let cls = self.cls();
            if let Err(e) = self.send_now(cls).await {
                warn!(endpoint = %self.endpoint, error = %e, "failed to send CLS before closing");
            }
        }
        self.close();
    }
}

/// Reply `NOP` to a heartbeat frame, logging if the write can't be queued
/// immediately (it always can — `NOP` is a handful of bytes).
pub fn ack_heartbeat(conn: &mut Connection) {
    let nop = conn.nop();
    conn.queue(nop);
    if let Err(e) = conn.try_flush() {
        warn!(endpoint = %conn.endpoint(), error = %e, "failed to ack heartbeat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_starts_with_zero_ready() {
        let conn = Connection::new(Endpoint::new("127.0.0.1", 4150));
        assert_eq!(conn.ready(), 0);
        assert_eq!(conn.last_ready_sent(), 0);
        assert_eq!(conn.max_rdy_count(), DEFAULT_MAX_RDY_COUNT);
        assert_eq!(conn.state(), ConnectionState::New);
        assert!(!conn.alive());
    }

    #[test]
    fn set_ready_clamps_to_max_rdy_count() {
        let mut conn = Connection::new(Endpoint::new("127.0.0.1", 4150));
        conn.max_rdy_count = 10;
        let _ = conn.set_ready(100);
        assert_eq!(conn.ready(), 10);
        assert_eq!(conn.last_ready_sent(), 10);
    }

    #[test]
    fn note_message_delivered_decrements_ready() {
        let mut conn = Connection::new(Endpoint::new("127.0.0.1", 4150));
        let _ = conn.set_ready(3);
        conn.note_message_delivered();
        assert_eq!(conn.ready(), 2);
    }

    #[test]
    fn note_message_delivered_can_drive_ready_negative() {
        let mut conn = Connection::new(Endpoint::new("127.0.0.1", 4150));
        conn.note_message_delivered();
        assert_eq!(conn.ready(), -1);
    }

    #[test]
    fn cls_encodes_the_bare_command() {
        let conn = Connection::new(Endpoint::new("127.0.0.1", 4150));
        assert_eq!(conn.cls().as_ref(), b"CLS\n");
    }

    #[tokio::test]
    async fn close_gracefully_marks_the_connection_closed_even_with_no_socket() {
        let mut conn = Connection::new(Endpoint::new("127.0.0.1", 4150));
        conn.close_gracefully().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.alive());
    }
}
