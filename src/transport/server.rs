//! Secure datagram server.
//!
//! Listens on one UDP socket, terminates the cookie handshake, then carries
//! authenticated application records between registered clients and the
//! session layer. The server keeps no per-peer state before the second
//! client hello: the cookie is self-authenticating, so a spoofed first
//! hello costs the server nothing but one reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{self, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{record_type, Handshake, Pong, WireCodec};
use crate::config::TransportConfig;
use crate::crypto::{Asymmetric, MacScheme, Symmetric, MIN_KEY_SIZE};
use crate::transport::record::{parse_record, split_session_id};
use crate::transport::session_keys::SessionKeyManager;
use crate::transport::{GameTransport, TransportError};

/// Upper bound on concurrent per-recipient broadcast sends.
const MAX_CONCURRENT_SENDS: usize = 8;

/// Handler for authenticated application records.
pub type RequestHandler = Arc<dyn Fn(Uuid, u8, Vec<u8>) + Send + Sync>;

/// Handler invoked when a client completes the handshake.
pub type RegisterHandler = Arc<dyn Fn(Uuid) + Send + Sync>;

/// Authenticates opaque handshake tokens to a player identity.
pub trait TokenAuthenticator: Send + Sync {
    /// Resolve `token` to a player id, or fail the handshake.
    fn authenticate(&self, token: &[u8]) -> Result<Uuid, TransportError>;
}

/// An authenticated peer: born at `SERVER_HELLO`, refreshed by every
/// authenticated record, destroyed by heartbeat expiry or re-handshake.
#[derive(Clone)]
pub struct ClientRecord {
    /// Identity the authenticator resolved during the handshake.
    pub player_id: Uuid,
    session_id: Vec<u8>,
    addr: SocketAddr,
    e_key: Vec<u8>,
    last_heartbeat: Instant,
}

impl ClientRecord {
    /// The address this record owns until GC or re-handshake.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Cookie-handshake UDP server carrying encrypted application records.
pub struct SecureDatagramServer {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: TransportConfig,
    keys: SessionKeyManager,
    asym: Arc<dyn Asymmetric>,
    sym: Arc<dyn Symmetric>,
    codec: Arc<dyn WireCodec>,
    clients: Arc<RwLock<HashMap<Uuid, ClientRecord>>>,
    authenticator: OnceLock<Arc<dyn TokenAuthenticator>>,
    on_request: OnceLock<RequestHandler>,
    on_register: OnceLock<RegisterHandler>,
    shutdown: broadcast::Sender<()>,
    broadcasts: Arc<RwLock<()>>,
}

impl SecureDatagramServer {
    /// Bind the UDP socket and assemble the server. Fresh cookie and
    /// session keys are drawn here; a bind failure is fatal to the caller.
    pub async fn bind(
        config: TransportConfig,
        asym: Arc<dyn Asymmetric>,
        sym: Arc<dyn Symmetric>,
        mac: Arc<dyn MacScheme>,
        codec: Arc<dyn WireCodec>,
    ) -> Result<Arc<Self>, TransportError> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            local_addr,
            config,
            keys: SessionKeyManager::new(mac),
            asym,
            sym,
            codec,
            clients: Arc::new(RwLock::new(HashMap::new())),
            authenticator: OnceLock::new(),
            on_request: OnceLock::new(),
            on_register: OnceLock::new(),
            shutdown,
            broadcasts: Arc::new(RwLock::new(())),
        }))
    }

    /// Install the token authenticator. Must happen before `serve`.
    pub fn set_authenticator(&self, authenticator: Arc<dyn TokenAuthenticator>) {
        let _ = self.authenticator.set(authenticator);
    }

    /// Install the handler for authenticated application records.
    pub fn set_request_handler(&self, handler: RequestHandler) {
        let _ = self.on_request.set(handler);
    }

    /// Install the handler invoked after a client registers.
    pub fn set_register_handler(&self, handler: RegisterHandler) {
        let _ = self.on_register.set(handler);
    }

    /// Bound address of the datagram socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether `player` currently holds a registration.
    pub async fn registered(&self, player: &Uuid) -> bool {
        self.clients.read().await.contains_key(player)
    }

    /// Run the listen loop until [`SecureDatagramServer::stop`] is called.
    /// Oversized and undersized datagrams are dropped before dispatch.
    pub async fn serve(self: Arc<Self>) {
        if let Some(expiration) = self.config.heartbeat_expiration {
            self.spawn_gc(expiration);
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        // One extra byte so an over-limit datagram is detectable.
        let mut buf = vec![0u8; self.config.read_buffer_size + 1];
        info!(addr = %self.local_addr, "secure datagram server listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("listen loop stopping");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => {
                        if len > self.config.read_buffer_size {
                            warn!(%addr, len, "datagram exceeds read buffer, dropped");
                            continue;
                        }
                        self.handle_datagram(&buf[..len], addr).await;
                    }
                    Err(e) => error!(error = %e, "udp read failed"),
                },
            }
        }
    }

    /// Stop the listen loop and GC, drain in-flight broadcasts, and
    /// invalidate every client record. The socket itself is released when
    /// the server is dropped.
    pub async fn stop(&self) {
        info!("secure datagram server stopping");
        let _ = self.shutdown.send(());
        // Taking the write side waits out every in-flight broadcast task.
        let _drain = self.broadcasts.write().await;
        self.clients.write().await.clear();
        info!("secure datagram server stopped");
    }

    fn spawn_gc(&self, expiration: Duration) {
        let clients = Arc::clone(&self.clients);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(expiration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let expired: Vec<Uuid> = clients
                            .read()
                            .await
                            .values()
                            .filter(|c| now.duration_since(c.last_heartbeat) > expiration)
                            .map(|c| c.player_id)
                            .collect();
                        if expired.is_empty() {
                            continue;
                        }
                        // Write lock held only for the deletions.
                        let mut clients = clients.write().await;
                        for player in &expired {
                            clients.remove(player);
                        }
                        info!(evicted = expired.len(), "heartbeat expiry evicted clients");
                    }
                }
            }
        });
    }

    async fn handle_datagram(&self, payload: &[u8], addr: SocketAddr) {
        let (record_kind, body) = match parse_record(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(%addr, error = %e, "malformed datagram dropped");
                return;
            }
        };

        match record_kind {
            record_type::CLIENT_HELLO => self.handle_client_hello(body, addr).await,
            record_type::PING => self.handle_ping(body, addr).await,
            other => self.handle_application_record(other, body, addr).await,
        }
    }

    /// First or second client hello; the cookie field tells them apart.
    async fn handle_client_hello(&self, body: &[u8], addr: SocketAddr) {
        let payload = match self.asym.decrypt(body) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%addr, error = %e, "client hello decryption failed");
                return;
            }
        };
        let hello = match self.codec.unmarshal_handshake(&payload) {
            Ok(hello) => hello,
            Err(e) => {
                debug!(%addr, error = %e, "undecodable client hello dropped");
                return;
            }
        };

        if hello.cookie.is_empty() {
            self.say_hello_verify(addr, &hello).await;
        } else {
            self.say_server_hello(addr, &hello).await;
        }
    }

    /// Answer a first hello with an address-bound cookie. No state is
    /// retained; the cookie proves itself when it comes back.
    async fn say_hello_verify(&self, addr: SocketAddr, hello: &Handshake) {
        if hello.key.len() < MIN_KEY_SIZE {
            warn!(%addr, key_len = hello.key.len(), "insecure client key size");
            return;
        }

        let verify = Handshake {
            cookie: self.keys.addr_cookie(addr.ip(), &hello.random),
            timestamp: unix_millis(),
            ..Default::default()
        };
        let Ok(payload) = self.codec.marshal_handshake(&verify) else {
            error!("failed to encode hello verify");
            return;
        };
        match self.sym.encrypt(&payload, &hello.key) {
            Ok(sealed) => {
                self.send_record(addr, record_type::HELLO_VERIFY, &sealed).await;
            }
            Err(e) => error!(%addr, error = %e, "hello verify encryption failed"),
        }
    }

    /// Validate the cookied hello, authenticate the token, register the
    /// client and complete the handshake with a `SERVER_HELLO`.
    async fn say_server_hello(&self, addr: SocketAddr, hello: &Handshake) {
        if !self.keys.verify_cookie(addr.ip(), &hello.random, &hello.cookie) {
            warn!(%addr, "client cookie is invalid");
            return;
        }
        if hello.key.len() < MIN_KEY_SIZE {
            warn!(%addr, key_len = hello.key.len(), "insecure client key size");
            return;
        }

        let token = if hello.token.is_empty() {
            Vec::new()
        } else {
            match self.sym.decrypt(&hello.token, &hello.key) {
                Ok(token) => token,
                Err(e) => {
                    error!(%addr, error = %e, "handshake token decryption failed");
                    return;
                }
            }
        };

        let Some(authenticator) = self.authenticator.get() else {
            warn!(%addr, "no authenticator configured, handshake dropped");
            return;
        };
        let player_id = match authenticator.authenticate(&token) {
            Ok(id) => id,
            Err(e) => {
                warn!(%addr, error = %e, "token authentication failed");
                return;
            }
        };

        let session_id = self.keys.session_id(addr.ip(), player_id);
        debug!(player = %player_id, session = %hex::encode(&session_id[..8]), "session id issued");
        let record = ClientRecord {
            player_id,
            session_id: session_id.clone(),
            addr,
            e_key: hello.key.clone(),
            last_heartbeat: Instant::now(),
        };
        // Insert evicts any prior registration for the same player.
        self.clients.write().await.insert(player_id, record);

        let server_hello = Handshake {
            session_id,
            timestamp: unix_millis(),
            ..Default::default()
        };
        let Ok(payload) = self.codec.marshal_handshake(&server_hello) else {
            error!("failed to encode server hello");
            return;
        };
        match self.sym.encrypt(&payload, &hello.key) {
            Ok(sealed) => {
                self.send_record(addr, record_type::SERVER_HELLO, &sealed).await;
            }
            Err(e) => {
                error!(%addr, error = %e, "server hello encryption failed");
                return;
            }
        }

        if let Some(on_register) = self.on_register.get() {
            on_register(player_id);
        }
        info!(player = %player_id, %addr, "accepted connection with client");
    }

    async fn handle_ping(&self, body: &[u8], addr: SocketAddr) {
        let received_at = unix_millis();
        let Some(client) = self.find_client(addr).await else {
            debug!(%addr, "ping from unregistered address");
            self.send_unauth(addr).await;
            return;
        };

        let Some(ping_body) = self.authenticate_body(&client, body, addr).await else {
            return;
        };
        let ping = match self.codec.unmarshal_ping(&ping_body) {
            Ok(ping) => ping,
            Err(e) => {
                debug!(%addr, error = %e, "undecodable ping dropped");
                return;
            }
        };

        self.touch_heartbeat(client.player_id).await;

        let pong = Pong {
            ping_sent_at: ping.sent_at,
            received_at,
            sent_at: unix_millis(),
        };
        let Ok(payload) = self.codec.marshal_pong(&pong) else {
            error!("failed to encode pong");
            return;
        };
        match self.sym.encrypt(&payload, &client.e_key) {
            Ok(sealed) => self.send_record(addr, record_type::PONG, &sealed).await,
            Err(e) => error!(%addr, error = %e, "pong encryption failed"),
        }
    }

    async fn handle_application_record(&self, record_kind: u8, body: &[u8], addr: SocketAddr) {
        let Some(client) = self.find_client(addr).await else {
            debug!(%addr, "application record from unregistered address");
            self.send_unauth(addr).await;
            return;
        };

        let Some(app_body) = self.authenticate_body(&client, body, addr).await else {
            return;
        };

        self.touch_heartbeat(client.player_id).await;

        match self.on_request.get() {
            Some(on_request) => on_request(client.player_id, record_kind, app_body),
            None => debug!(player = %client.player_id, "no request handler, record dropped"),
        }
    }

    /// Decrypt a record body with the client's key and check the session-ID
    /// prefix. A mismatch earns an `UNAUTH` nudge inviting a re-handshake.
    async fn authenticate_body(
        &self,
        client: &ClientRecord,
        body: &[u8],
        addr: SocketAddr,
    ) -> Option<Vec<u8>> {
        let payload = match self.sym.decrypt(body, &client.e_key) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%addr, error = %e, "record decryption failed");
                return None;
            }
        };
        let (session_id, rest) = match split_session_id(&payload, client.session_id.len()) {
            Ok(split) => split,
            Err(e) => {
                debug!(%addr, error = %e, "record body shorter than session id");
                self.send_unauth(addr).await;
                return None;
            }
        };
        if session_id != client.session_id.as_slice() {
            warn!(%addr, player = %client.player_id, "session id mismatch");
            self.send_unauth(addr).await;
            return None;
        }
        Some(rest.to_vec())
    }

    /// Find the record owning a source address. Address equality covers IP
    /// and port.
    async fn find_client(&self, addr: SocketAddr) -> Option<ClientRecord> {
        self.clients
            .read()
            .await
            .values()
            .find(|client| client.addr == addr)
            .cloned()
    }

    async fn touch_heartbeat(&self, player: Uuid) {
        if let Some(client) = self.clients.write().await.get_mut(&player) {
            client.last_heartbeat = Instant::now();
        }
    }

    async fn send_record(&self, addr: SocketAddr, record_kind: u8, body: &[u8]) {
        let mut message = Vec::with_capacity(1 + body.len());
        message.push(record_kind);
        message.extend_from_slice(body);
        if let Err(e) = self.socket.send_to(&message, addr).await {
            warn!(%addr, error = %e, "udp send failed");
        }
    }

    async fn send_unauth(&self, addr: SocketAddr) {
        if let Err(e) = self.socket.send_to(&[record_type::UNAUTH], addr).await {
            warn!(%addr, error = %e, "failed to send unauth record");
        }
    }
}

impl GameTransport for SecureDatagramServer {
    /// Encrypt once per recipient and send concurrently, at most
    /// [`MAX_CONCURRENT_SENDS`] at a time. A failed send is logged and does
    /// not abort the others. Broadcasts issued after `stop` are dropped.
    fn broadcast(&self, players: &[Uuid], record_kind: u8, payload: &[u8]) {
        let Ok(drain_guard) = Arc::clone(&self.broadcasts).try_read_owned() else {
            debug!("server stopping, broadcast dropped");
            return;
        };

        let clients = Arc::clone(&self.clients);
        let socket = Arc::clone(&self.socket);
        let sym = Arc::clone(&self.sym);
        let players = players.to_vec();
        let payload = payload.to_vec();

        tokio::spawn(async move {
            let _drain_guard = drain_guard;
            let targets: Vec<(Uuid, SocketAddr, Vec<u8>)> = {
                let clients = clients.read().await;
                players
                    .iter()
                    .filter_map(|id| {
                        clients.get(id).map(|c| (*id, c.addr, c.e_key.clone()))
                    })
                    .collect()
            };

            stream::iter(targets)
                .for_each_concurrent(MAX_CONCURRENT_SENDS, |(player, addr, key)| {
                    let socket = Arc::clone(&socket);
                    let sym = Arc::clone(&sym);
                    let payload = payload.clone();
                    async move {
                        match sym.encrypt(&payload, &key) {
                            Ok(sealed) => {
                                let mut message = Vec::with_capacity(1 + sealed.len());
                                message.push(record_kind);
                                message.extend_from_slice(&sealed);
                                if let Err(e) = socket.send_to(&message, addr).await {
                                    warn!(player = %player, %addr, error = %e, "broadcast send failed");
                                }
                            }
                            Err(e) => {
                                error!(player = %player, error = %e, "broadcast encryption failed");
                            }
                        }
                    }
                })
                .await;
        });
    }

    fn public_key(&self) -> Vec<u8> {
        self.asym.public_key()
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
