//! Secure Datagram Transport
//!
//! Connectionless-over-UDP server with a cookie-based mutually
//! authenticated handshake modeled on DTLS. After the handshake, every
//! client record body is `Encrypt(eKey, sessionId || payload)`; the server
//! authenticates the session prefix before dispatching. Liveness is tracked
//! per client and expired records are garbage collected.

pub mod record;
pub mod server;
pub mod session_keys;

pub use record::{parse_record, split_session_id};
pub use server::{ClientRecord, SecureDatagramServer, TokenAuthenticator};
pub use session_keys::{SessionKeyManager, SESSION_ID_SIZE};

use std::net::SocketAddr;

use thiserror::Error;
use uuid::Uuid;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Datagram below the minimum `[type, body]` size.
    #[error("datagram below minimum record size")]
    RecordTooShort,

    /// Decrypted payload shorter than a session identifier.
    #[error("invalid payload body size")]
    InvalidPayloadSize,

    /// Token did not resolve to a known player.
    #[error("token authentication failed")]
    AuthenticationFailed,
}

/// Outbound surface of the transport that the session layer drives.
///
/// `broadcast` is fire-and-forget: sends are spawned with bounded
/// concurrency and per-recipient failures are logged, never returned.
pub trait GameTransport: Send + Sync {
    /// Encrypt `payload` per recipient and send `[record_type, body]` to
    /// each registered player's address.
    fn broadcast(&self, players: &[Uuid], record_type: u8, payload: &[u8]);

    /// DER-encoded public key clients handshake against.
    fn public_key(&self) -> Vec<u8>;

    /// Bound address of the datagram socket.
    fn local_addr(&self) -> SocketAddr;
}
