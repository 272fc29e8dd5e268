//! The connection-fleet multiplexer.
//!
//! `Client` owns every TCP connection to nsqd this process has opened for a
//! topic and drives them all from a single `.await` point. There is no
//! per-connection task: `read()` snapshots the fleet, waits for any one
//! connection to become readable or writable (or for a timeout to elapse),
//! then sweeps every connection with non-blocking `try_read`/`try_write`
//! calls — the same shape as a classic `select()` loop, expressed with
//! Tokio's cooperative readiness primitives instead of raw fds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use futures::future::{select_all, BoxFuture};
use nsq_config::{HandshakeConfig, IdentifyDefaults};
use nsq_proto::Frame;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::connection::{ack_heartbeat, Connection};
use crate::discovery::Discovery;
use crate::endpoint::Endpoint;
use crate::error::{ConfigError, ConnectionError};

/// Construction-time options for a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub lookupd_http_addresses: Vec<String>,
    pub nsqd_tcp_addresses: Vec<String>,
    pub topic: String,
    pub identify_defaults: IdentifyDefaults,
    pub handshake: HandshakeConfig,
    /// `None` means "discover once, at construction time" (the default).
    /// `Some(interval)` additionally lets a caller drive periodic
    /// `discover_and_connect` calls itself; `Client` does not spawn a timer.
    pub discovery_interval: Option<Duration>,
}

#[derive(Clone)]
struct ConnSlot {
    conn: Arc<TokioMutex<Connection>>,
    alive: Arc<AtomicBool>,
}

pub(crate) struct ClientInner {
    connections: StdMutex<HashMap<Endpoint, ConnSlot>>,
    static_addresses: Vec<Endpoint>,
    discovery: Option<Discovery>,
    identify_defaults: IdentifyDefaults,
    handshake: HandshakeConfig,
}

/// A handle to a running connection fleet. Cheap to clone — it's an `Arc`
/// around the shared connection table.
#[derive(Clone)]
pub struct Client(pub(crate) Arc<ClientInner>);

/// A non-owning reference back to a [`Client`], carried by [`crate::Message`]
/// so acking a message doesn't keep the whole fleet alive.
pub type ClientHandle = Weak<ClientInner>;

impl Client {
    /// Build a client and perform the one construction-time connection
    /// sweep (`check_connections` over static addresses, plus one lookupd
    /// poll if `lookupd_http_addresses` is non-empty).
    pub async fn new(options: ClientOptions) -> Result<Self, ConfigError> {
        if options.lookupd_http_addresses.is_empty() && options.nsqd_tcp_addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        if !options.lookupd_http_addresses.is_empty() && options.topic.is_empty() {
            return Err(ConfigError::MissingTopicOrChannel);
        }

        let static_addresses: Vec<Endpoint> = options
            .nsqd_tcp_addresses
            .iter()
            .filter_map(|addr| Endpoint::parse(addr))
            .collect();

        let discovery = if options.lookupd_http_addresses.is_empty() {
            None
        } else {
            Some(Discovery::new(
                options.lookupd_http_addresses.clone(),
                options.topic.clone(),
            ))
        };

        let client = Client(Arc::new(ClientInner {
            connections: StdMutex::new(HashMap::new()),
            static_addresses,
            discovery,
            identify_defaults: options.identify_defaults,
            handshake: options.handshake,
        }));

        client.check_connections().await;
        Ok(client)
    }

    /// A weak handle suitable for embedding in a [`crate::Message`].
    pub fn downgrade(&self) -> ClientHandle {
        Arc::downgrade(&self.0)
    }

    /// Endpoints currently in the table, regardless of liveness.
    pub fn connections(&self) -> Vec<Endpoint> {
        self.0.connections.lock().unwrap().keys().cloned().collect()
    }

    /// Endpoints currently alive.
    pub fn live_connections(&self) -> Vec<Endpoint> {
        self.0
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, slot)| slot.alive.load(Ordering::Acquire))
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    pub(crate) fn connection_handle(&self, endpoint: &Endpoint) -> Option<Arc<TokioMutex<Connection>>> {
        self.0
            .connections
            .lock()
            .unwrap()
            .get(endpoint)
            .map(|slot| slot.conn.clone())
    }

    /// Insert an already-open connection, e.g. one the caller dialed itself.
    ///
    /// A no-op when `endpoint` is already present in the table: the existing
    /// entry is left untouched and `false` is returned. Returns `true` when
    /// the connection was newly inserted, so a caller driving its own
    /// per-connection setup (subscribe, initial `RDY`) on top of `Client` can
    /// tell a fresh connection from a duplicate insert. `connect_endpoint`
    /// routes through this for exactly that reason.
    pub fn add(&self, endpoint: Endpoint, connection: Connection) -> bool {
        let mut table = self.0.connections.lock().unwrap();
        if table.contains_key(&endpoint) {
            return false;
        }
        let alive = Arc::new(AtomicBool::new(connection.alive()));
        table.insert(
            endpoint,
            ConnSlot {
                conn: Arc::new(TokioMutex::new(connection)),
                alive,
            },
        );
        true
    }

    /// Remove `endpoint` from the table and close its connection, if
    /// present. A no-op (idempotent) when `endpoint` isn't in the table.
    pub async fn remove(&self, endpoint: &Endpoint) {
        let slot = self.0.connections.lock().unwrap().remove(endpoint);
        if let Some(slot) = slot {
            slot.alive.store(false, Ordering::Release);
            slot.conn.lock().await.close();
        }
    }

    async fn connect_endpoint(&self, endpoint: Endpoint) -> Result<(), ConnectionError> {
        let mut connection = Connection::new(endpoint.clone());
        connection
            .open(&self.0.identify_defaults, &self.0.handshake)
            .await?;
        info!(%endpoint, "connected to nsqd");
        self.add(endpoint, connection);
        Ok(())
    }

    /// Connect every statically configured address not already in the
    /// table, and run one discovery pass if lookupd addresses were given.
    ///
    /// A dead statically-configured connection is left alone here — the
    /// caller owns deciding when to retire or reconnect it manually.
    /// Dead discovery-sourced connections, by contrast, are retried by
    /// `discover_and_connect` on the next poll.
    pub async fn check_connections(&self) {
        let missing: Vec<Endpoint> = {
            let table = self.0.connections.lock().unwrap();
            self.static_addresses()
                .into_iter()
                .filter(|addr| !table.contains_key(addr))
                .collect()
        };
        for addr in missing {
            if let Err(e) = self.connect_endpoint(addr.clone()).await {
                warn!(endpoint = %addr, error = %e, "failed to connect static address");
            }
        }

        if self.0.discovery.is_some() {
            self.discover_and_connect().await;
        }
    }

    fn static_addresses(&self) -> Vec<Endpoint> {
        self.0.static_addresses.clone()
    }

    /// Poll lookupd and connect to every endpoint not already in the table.
    /// Endpoints already present but marked dead are reconnected — this is
    /// the asymmetry with `check_connections`'s handling of static
    /// addresses, carried over from the original nsq-py client. A dead
    /// entry is removed first so the reconnect lands as a fresh `add()`
    /// rather than a no-op duplicate — per spec.md §3, a dead connection is
    /// never restarted in place, a new one replaces it.
    pub async fn discover_and_connect(&self) {
        let Some(discovery) = &self.0.discovery else {
            return;
        };
        let discovered = discovery.discover().await;

        for endpoint in discovered {
            let existing_dead = {
                let table = self.0.connections.lock().unwrap();
                match table.get(&endpoint) {
                    None => false,
                    Some(slot) => !slot.alive.load(Ordering::Acquire),
                }
            };
            if existing_dead {
                self.remove(&endpoint).await;
            }
            if existing_dead || !self.0.connections.lock().unwrap().contains_key(&endpoint) {
                if let Err(e) = self.connect_endpoint(endpoint.clone()).await {
                    warn!(endpoint = %endpoint, error = %e, "failed to connect discovered address");
                }
            }
        }
    }

    /// One pass of the readiness loop: wait for any connection to become
    /// readable/writable (bounded by `timeout`), then sweep every
    /// connection's non-blocking read/write and return the decoded message
    /// frames. Heartbeats are acked in place and never returned; frames from
    /// a connection that turns out to be dead are dropped once the
    /// connection is closed and marked dead.
    pub async fn read(&self, timeout: Duration) -> Vec<(Endpoint, Frame)> {
        let snapshot: Vec<(Endpoint, ConnSlot)> = {
            let table = self.0.connections.lock().unwrap();
            table
                .iter()
                .filter(|(_, slot)| slot.alive.load(Ordering::Acquire))
                .map(|(endpoint, slot)| (endpoint.clone(), slot.clone()))
                .collect()
        };

        if snapshot.is_empty() {
            return Vec::new();
        }

        wait_for_readiness(&snapshot, timeout).await;

        let mut out = Vec::new();
        for (endpoint, slot) in &snapshot {
            let mut conn = slot.conn.lock().await;
            match conn.try_flush() {
                Ok(()) => {}
                Err(e) => {
                    warn!(%endpoint, error = %e, "write failed, closing connection");
                    conn.close();
                    slot.alive.store(false, Ordering::Release);
                    continue;
                }
            }

            match conn.try_read_frames() {
                Ok(frames) => {
                    for frame in frames {
                        handle_or_forward(&mut conn, endpoint, frame, &mut out);
                    }
                    if !conn.alive() {
                        slot.alive.store(false, Ordering::Release);
                    }
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "read failed, closing connection");
                    conn.close();
                    slot.alive.store(false, Ordering::Release);
                }
            }
        }
        out
    }

    /// Remove and close every connection. Terminal: further `read()` calls
    /// see an empty table and return immediately without waiting out the
    /// timeout.
    pub async fn close(&self) {
        let slots: Vec<ConnSlot> = {
            let mut table = self.0.connections.lock().unwrap();
            table.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            slot.alive.store(false, Ordering::Release);
            slot.conn.lock().await.close();
        }
    }
}

fn handle_or_forward(
    conn: &mut Connection,
    endpoint: &Endpoint,
    frame: Frame,
    out: &mut Vec<(Endpoint, Frame)>,
) {
    match &frame {
        Frame::Response(body) if body.as_ref() == nsq_proto::HEARTBEAT => {
            debug!(%endpoint, "heartbeat");
            ack_heartbeat(conn);
        }
        Frame::Error(body) if !is_fatal_error(body) => {
            debug!(%endpoint, error = %String::from_utf8_lossy(body), "non-fatal protocol error");
            out.push((endpoint.clone(), frame));
        }
        Frame::Error(body) => {
            warn!(%endpoint, error = %String::from_utf8_lossy(body), "fatal protocol error, closing connection");
            conn.close();
        }
        _ => out.push((endpoint.clone(), frame)),
    }
}

/// Errors nsqd sends that the protocol defines as non-fatal — the
/// connection stays open and the client is expected to keep going.
fn is_fatal_error(body: &[u8]) -> bool {
    const NON_FATAL_PREFIXES: &[&[u8]] = &[
        b"E_FIN_FAILED",
        b"E_REQ_FAILED",
        b"E_TOUCH_FAILED",
        b"E_MPUB_FAILED",
    ];
    !NON_FATAL_PREFIXES.iter().any(|prefix| body.starts_with(prefix))
}

/// Race `readable()`/`writable()` across every connection in `snapshot`,
/// bounded by `timeout`. The exact connection that wins is irrelevant — the
/// caller sweeps all of them with non-blocking calls afterward — so this
/// only needs to report "something might be ready, or the clock ran out."
async fn wait_for_readiness(snapshot: &[(Endpoint, ConnSlot)], timeout: Duration) {
    let mut futures: Vec<BoxFuture<'_, ()>> = Vec::with_capacity(snapshot.len() * 2);
    for (_, slot) in snapshot {
        let conn = slot.conn.clone();
        futures.push(Box::pin(async move {
            let guard = conn.lock().await;
            let _ = guard.readable().await;
        }));
        let conn = slot.conn.clone();
        futures.push(Box::pin(async move {
            let guard = conn.lock().await;
            let _ = guard.writable().await;
        }));
    }

    let race = select_all(futures);
    let _ = tokio::time::timeout(timeout, race).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_requires_at_least_one_address_source() {
        let err = Client::new(ClientOptions::default()).await.unwrap_err();
        assert_eq!(err, ConfigError::NoAddresses);
    }

    #[tokio::test]
    async fn new_requires_a_topic_when_lookupd_addresses_are_given() {
        let options = ClientOptions {
            lookupd_http_addresses: vec!["http://127.0.0.1:4161".to_string()],
            ..Default::default()
        };
        let err = Client::new(options).await.unwrap_err();
        assert_eq!(err, ConfigError::MissingTopicOrChannel);
    }

    #[tokio::test]
    async fn read_with_no_connections_returns_empty_without_waiting_out_the_timeout() {
        let client = Client(Arc::new(ClientInner {
            connections: StdMutex::new(HashMap::new()),
            static_addresses: Vec::new(),
            discovery: None,
            identify_defaults: IdentifyDefaults::default(),
            handshake: HandshakeConfig::default(),
        }));
        let start = tokio::time::Instant::now();
        let frames = client.read(Duration::from_secs(30)).await;
        assert!(frames.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn non_fatal_error_prefixes_are_recognized() {
        assert!(!is_fatal_error(b"E_FIN_FAILED failed to finish message"));
        assert!(is_fatal_error(b"E_BAD_TOPIC topic name is invalid"));
    }

    #[tokio::test]
    async fn add_reports_newly_inserted_and_no_ops_on_a_duplicate() {
        let client = Client(Arc::new(ClientInner {
            connections: StdMutex::new(HashMap::new()),
            static_addresses: Vec::new(),
            discovery: None,
            identify_defaults: IdentifyDefaults::default(),
            handshake: HandshakeConfig::default(),
        }));
        let endpoint = Endpoint::new("127.0.0.1", 4150);

        assert!(client.add(endpoint.clone(), Connection::new(endpoint.clone())));
        assert_eq!(client.connections(), vec![endpoint.clone()]);

        // A second add() for the same endpoint must not replace the
        // existing table entry or report a fresh insertion.
        assert!(!client.add(endpoint.clone(), Connection::new(endpoint.clone())));
        assert_eq!(client.connections(), vec![endpoint]);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_empties_the_table() {
        let client = Client(Arc::new(ClientInner {
            connections: StdMutex::new(HashMap::new()),
            static_addresses: Vec::new(),
            discovery: None,
            identify_defaults: IdentifyDefaults::default(),
            handshake: HandshakeConfig::default(),
        }));
        let endpoint = Endpoint::new("127.0.0.1", 4150);
        client.add(endpoint.clone(), Connection::new(endpoint.clone()));

        client.remove(&endpoint).await;
        assert!(client.connections().is_empty());

        // Removing an endpoint that's already gone must not panic or error.
        client.remove(&endpoint).await;
        assert!(client.connections().is_empty());
    }

    #[tokio::test]
    async fn close_empties_the_table_and_read_returns_immediately_after() {
        let client = Client(Arc::new(ClientInner {
            connections: StdMutex::new(HashMap::new()),
            static_addresses: Vec::new(),
            discovery: None,
            identify_defaults: IdentifyDefaults::default(),
            handshake: HandshakeConfig::default(),
        }));
        let endpoint = Endpoint::new("127.0.0.1", 4150);
        client.add(endpoint.clone(), Connection::new(endpoint));

        client.close().await;
        assert!(client.connections().is_empty());

        let start = tokio::time::Instant::now();
        let frames = client.read(Duration::from_secs(30)).await;
        assert!(frames.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
