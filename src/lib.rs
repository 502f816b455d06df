//! # Maze Rush Server
//!
//! Authoritative backend for a real-time multiplayer maze game: players
//! handshake over a DTLS-style secure datagram transport, get matched by
//! rank and latency, and race through a shared maze collecting rewards.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MAZE RUSH SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  crypto/       - Primitive seams (non-game)                  │
//! │  ├── asym.rs   - RSA-OAEP ClientHello decryption             │
//! │  ├── sym.rs    - ChaCha20-Poly1305 record bodies             │
//! │  └── mac.rs    - HMAC-SHA-256 cookies & session IDs          │
//! │                                                              │
//! │  codec/        - Wire records and binary codec               │
//! │                                                              │
//! │  transport/    - Secure datagram transport (UDP)             │
//! │  ├── server.rs - Listen loop, handshake, dispatch, GC        │
//! │  └── session_keys.rs - Cookie / session-ID secrets           │
//! │                                                              │
//! │  game/         - Authoritative match logic                   │
//! │  ├── maze.rs   - Wilson-walk maze, move validation           │
//! │  ├── reward.rs - Center-biased reward placement              │
//! │  └── engine.rs - Per-match event loop                        │
//! │                                                              │
//! │  session/      - Player ↔ session registry, fan-out          │
//! │  matchmaking/  - Bucketed FIFO queue + matchmaker            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data flow
//!
//! A client handshakes with the transport, which authenticates its token
//! through the registry. Matched players get a session: the registry builds
//! a rewarded maze, starts a [`game::GameEngine`] and fans its snapshots
//! back out through the transport. Application records from authenticated
//! clients are routed into the owning engine's action channel.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod crypto;
pub mod game;
pub mod matchmaking;
pub mod session;
pub mod transport;

pub use codec::BincodeCodec;
pub use config::{MatchmakingConfig, SessionConfig, TransportConfig};
pub use crypto::{ChaChaPolySymmetric, HmacSha256, RsaAsymmetric};
pub use game::{GameEngine, Maze, Player};
pub use matchmaking::{InMemorySortedQueue, Matchmaker};
pub use session::SessionRegistry;
pub use transport::SecureDatagramServer;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
