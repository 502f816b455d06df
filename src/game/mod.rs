//! Game Logic
//!
//! The authoritative side of a match: maze geometry, reward placement,
//! players and the per-match engine. Nothing in here knows about the
//! transport; the engine talks to the world through its channels only.

pub mod cell;
pub mod engine;
pub mod maze;
pub mod player;
pub mod reward;

pub use cell::{Cell, CellPosition, Direction, Move};
pub use engine::{EngineChannels, EngineHandle, GameEngine, GameError, MAX_PLAYERS, MIN_PLAYERS};
pub use maze::{Maze, MazeError, MAX_DIMENSION};
pub use player::Player;
pub use reward::{distribute, RewardError, RewardModel};
