//! Protocol Records & Codec
//!
//! Wire format for client-server communication over the secure datagram
//! transport. Every datagram is `[type_byte, ...body]`; handshake and
//! liveness bodies are the records below, application bodies are
//! codec-encoded `Action`/`GameState` payloads.
//!
//! The transport and engine only see the [`WireCodec`] / [`GameCodec`]
//! traits; the production implementation is [`BincodeCodec`].

pub mod bincode;

pub use self::bincode::BincodeCodec;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::cell::{CellPosition, Direction};
use crate::game::maze::Maze;
use crate::game::player::Player;

/// Wire record types. One byte, bit values; handshake and liveness types
/// are fixed, application types use the remaining bits per direction.
pub mod record_type {
    /// Client → server: asymmetrically encrypted handshake opener.
    pub const CLIENT_HELLO: u8 = 1;
    /// Server → client: address-bound cookie challenge.
    pub const HELLO_VERIFY: u8 = 2;
    /// Server → client: handshake completion carrying the session ID.
    pub const SERVER_HELLO: u8 = 4;
    /// Client → server: liveness probe.
    pub const PING: u8 = 8;
    /// Server → client: liveness answer.
    pub const PONG: u8 = 16;
    /// Server → client: session unknown, a fresh handshake is required.
    pub const UNAUTH: u8 = 32;
    /// Client → server: maze move action.
    pub const MOVE: u8 = 64;
    /// Client → server: request a fresh state snapshot.
    pub const STATE_REQUEST: u8 = 128;
    /// Server → client: state snapshot broadcast.
    pub const GAME_STATE: u8 = 64;
    /// Server → client: final snapshot of a finished match.
    pub const GAME_ENDED: u8 = 128;
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Decoding failed; the payload is malformed for the expected record.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Handshake record. Field presence varies by leg: the first hello leaves
/// `cookie` empty, the second carries it back together with the encrypted
/// `token`, and only `SERVER_HELLO` fills `session_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Server-issued session identifier (SERVER_HELLO only).
    pub session_id: Vec<u8>,
    /// Client-chosen random, at least 16 bytes.
    pub random: Vec<u8>,
    /// Address-bound cookie; empty on the first hello.
    pub cookie: Vec<u8>,
    /// Opaque auth material, symmetric-encrypted with the client key.
    pub token: Vec<u8>,
    /// Client symmetric key, at least 32 bytes.
    pub key: Vec<u8>,
    /// Milliseconds since the Unix epoch, informational.
    pub timestamp: i64,
}

/// Liveness probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Client transmit time in Unix milliseconds.
    pub sent_at: i64,
}

/// Liveness answer carrying both endpoints' clocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Echo of the probe's transmit time.
    pub ping_sent_at: i64,
    /// Server receive time in Unix milliseconds.
    pub received_at: i64,
    /// Server transmit time in Unix milliseconds.
    pub sent_at: i64,
}

/// A player's move request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Acting player.
    pub player_id: Uuid,
    /// The cell the player believes it occupies. Stale positions are
    /// dropped by the engine, which also defeats replays.
    pub from: CellPosition,
    /// Requested step.
    pub direction: Direction,
}

/// Snapshot of the authoritative game state at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Monotonic state version; increments on every applied move.
    pub version: u64,
    /// Full maze including remaining rewards.
    pub maze: Maze,
    /// All players, sorted by id for stable encoding.
    pub players: Vec<Player>,
}

/// Encoding of handshake and liveness records.
pub trait WireCodec: Send + Sync {
    /// Encode a handshake record.
    fn marshal_handshake(&self, record: &Handshake) -> Result<Vec<u8>, CodecError>;
    /// Decode a handshake record.
    fn unmarshal_handshake(&self, bytes: &[u8]) -> Result<Handshake, CodecError>;
    /// Encode a ping.
    fn marshal_ping(&self, record: &Ping) -> Result<Vec<u8>, CodecError>;
    /// Decode a ping.
    fn unmarshal_ping(&self, bytes: &[u8]) -> Result<Ping, CodecError>;
    /// Encode a pong.
    fn marshal_pong(&self, record: &Pong) -> Result<Vec<u8>, CodecError>;
    /// Decode a pong.
    fn unmarshal_pong(&self, bytes: &[u8]) -> Result<Pong, CodecError>;
}

/// Encoding of game actions and state snapshots.
pub trait GameCodec: Send + Sync {
    /// Encode a state snapshot.
    fn marshal_game_state(&self, state: &GameState) -> Result<Vec<u8>, CodecError>;
    /// Decode a state snapshot.
    fn unmarshal_game_state(&self, bytes: &[u8]) -> Result<GameState, CodecError>;
    /// Encode a move action.
    fn marshal_action(&self, action: &Action) -> Result<Vec<u8>, CodecError>;
    /// Decode a move action.
    fn unmarshal_action(&self, bytes: &[u8]) -> Result<Action, CodecError>;
}
