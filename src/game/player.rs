//! Match participants.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cell::CellPosition;

/// A participant in one match: identity, position and accumulated reward.
///
/// A player belongs to exactly one active session for that session's
/// lifetime; the registry enforces the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable player identity.
    pub id: Uuid,
    /// Current cell inside the session's maze.
    pub pos: CellPosition,
    /// Reward collected so far, never negative.
    pub reward: i32,
}

impl Player {
    /// A player at its spawn position with no reward.
    pub fn new(id: Uuid, pos: CellPosition) -> Self {
        Self {
            id,
            pos,
            reward: 0,
        }
    }
}
