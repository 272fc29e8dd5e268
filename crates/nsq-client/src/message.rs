//! A single message delivered from a subscribed connection.

use bytes::Bytes;
use nsq_proto::MessageFrame;
use tracing::warn;

use crate::client::ClientHandle;
use crate::endpoint::Endpoint;

/// A message received on a `SUB`'d connection.
///
/// `origin` is an endpoint key plus a weak handle back to the owning
/// `Client`'s shared state, rather than a strong reference to the
/// connection itself — acking a message never keeps a closed client's
/// connection table alive, and a message for a connection that has since
/// been removed simply no-ops its ack.
pub struct Message {
    pub id: [u8; 16],
    pub timestamp: i64,
    pub attempts: u16,
    pub body: Bytes,
    origin: Endpoint,
    client: ClientHandle,
}

impl Message {
    pub(crate) fn new(frame: MessageFrame, origin: Endpoint, client: ClientHandle) -> Self {
        Self {
            id: frame.id,
            timestamp: frame.timestamp,
            attempts: frame.attempts,
            body: frame.body,
            origin,
            client,
        }
    }

    /// Mark the message successfully processed.
    pub async fn fin(&self) {
        self.send_now(|conn| conn.fin(&self.id)).await;
    }

    /// Requeue the message with a broker-chosen or explicit delay.
    pub async fn req(&self, timeout_ms: u32) {
        self.send_now(|conn| conn.req(&self.id, timeout_ms)).await;
    }

    /// Reset the broker's in-flight timer for this message.
    pub async fn touch(&self) {
        self.send_now(|conn| conn.touch(&self.id)).await;
    }

    async fn send_now(&self, build: impl FnOnce(&crate::connection::Connection) -> Bytes) {
        let Some(inner) = self.client.upgrade() else {
            warn!(origin = %self.origin, "client is gone, dropping ack");
            return;
        };
        let client = crate::client::Client(inner);
        let Some(handle) = client.connection_handle(&self.origin) else {
            warn!(origin = %self.origin, "connection is gone, dropping ack");
            return;
        };
        let mut conn = handle.lock().await;
        let bytes = build(&conn);
        if let Err(e) = conn.send_now(bytes).await {
            warn!(origin = %self.origin, error = %e, "failed to send ack");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fin_on_a_dropped_client_does_not_panic() {
        let frame = MessageFrame {
            timestamp: 1,
            attempts: 1,
            id: [b'a'; 16],
            body: Bytes::from_static(b"hi"),
        };
        // No server listens on this address; `check_connections` logs and
        // continues, so `Client::new` still succeeds with an empty table.
        let client = crate::client::Client::new(crate::client::ClientOptions {
            nsqd_tcp_addresses: vec!["127.0.0.1:1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
        let handle = client.downgrade();
        drop(client);

        let message = Message::new(frame, Endpoint::new("127.0.0.1", 1), handle);
        message.fin().await;
    }

    #[tokio::test]
    async fn fin_on_a_closed_but_still_tabled_connection_does_not_hang() {
        let frame = MessageFrame {
            timestamp: 1,
            attempts: 1,
            id: [b'a'; 16],
            body: Bytes::from_static(b"hi"),
        };
        let endpoint = Endpoint::new("127.0.0.1", 4150);
        let client = crate::client::Client::new(crate::client::ClientOptions {
            nsqd_tcp_addresses: vec![endpoint.to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
        // Insert a connection that was never opened (no socket), simulating
        // one left dangling in the table after a fatal error closed it but
        // nothing has swept it out yet.
        client.add(endpoint.clone(), crate::connection::Connection::new(endpoint.clone()));
        let handle = client.downgrade();

        let message = Message::new(frame, endpoint, handle);
        tokio::time::timeout(std::time::Duration::from_secs(2), message.fin())
            .await
            .expect("fin() must not block forever on a connection with no open socket");
    }
}
