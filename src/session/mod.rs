//! Session Coordination
//!
//! Couples the transport to the game: maps authenticated players to live
//! game sessions and fans engine output back out over the transport.

pub mod registry;

pub use registry::{MazeFactory, SessionError, SessionRegistry};
