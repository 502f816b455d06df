//! Static configuration.
//!
//! Each subsystem takes its own parameter struct at construction time; there
//! is no process-wide mutable configuration and the core never reads
//! environment variables. Defaults carry the tuning the system shipped
//! with.

use std::net::SocketAddr;
use std::time::Duration;

use crate::game::reward::RewardModel;

/// Secure datagram transport parameters.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// UDP address to listen on.
    pub bind_addr: SocketAddr,
    /// Maximum accepted datagram size; larger datagrams are dropped.
    pub read_buffer_size: usize,
    /// Heartbeat expiry and GC period. `None` disables the collector.
    pub heartbeat_expiration: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().expect("static address parses"),
            read_buffer_size: 2048,
            heartbeat_expiration: Some(Duration::from_secs(3)),
        }
    }
}

/// Session registry parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Players per match, 2 to 4.
    pub max_players: usize,
    /// Wall-clock lifetime of a match.
    pub game_duration: Duration,
    /// Maze width for new matches.
    pub maze_width: u16,
    /// Maze height for new matches.
    pub maze_height: u16,
    /// Reward placement model for new matches.
    pub rewards: RewardModel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            game_duration: Duration::from_secs(5 * 60),
            maze_width: 20,
            maze_height: 10,
            rewards: RewardModel::default(),
        }
    }
}

/// Matchmaker parameters.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// Prefix for queue bucket keys.
    pub queue_prefix: String,
    /// Players per match; a bucket triggers at this count.
    pub max_players: usize,
    /// Rank difference treated as equal when bucketing.
    pub rank_tolerance: u32,
    /// Latency difference treated as equal when bucketing.
    pub latency_tolerance: u32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            queue_prefix: "matchmaker".to_string(),
            max_players: 2,
            rank_tolerance: 0,
            latency_tolerance: 0,
        }
    }
}
