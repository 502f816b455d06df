//! Authoritative per-match game engine.
//!
//! One engine owns one maze and its players. Actions arrive as raw
//! `[type_byte, ...payload]` frames on a bounded channel; snapshots leave on
//! the `state` channel and exactly one final snapshot leaves on `end` when
//! the match terminates. All state mutations happen under a single
//! reader-writer lock, which is always released before a channel send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::codec::{record_type, CodecError, GameCodec, GameState};
use crate::game::maze::Maze;
use crate::game::player::Player;

/// Fewest players a match can hold.
pub const MIN_PLAYERS: usize = 2;

/// Most players a match can hold.
pub const MAX_PLAYERS: usize = 4;

/// Smallest playable maze dimension.
const MIN_DIMENSION: u16 = 3;

const ACTION_BUFFER: usize = 64;
const STATE_BUFFER: usize = 16;

/// Engine construction errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// More players than [`MAX_PLAYERS`].
    #[error("too many players: {0}")]
    TooManyPlayers(usize),

    /// Fewer players than [`MIN_PLAYERS`].
    #[error("not enough players: {0}")]
    NotEnoughPlayers(usize),

    /// Maze below the minimum playable dimensions.
    #[error("maze {width}x{height} is not big enough")]
    MazeTooSmall {
        /// Maze width.
        width: u16,
        /// Maze height.
        height: u16,
    },

    /// A player spawns outside the maze.
    #[error("player {0} is out of the maze")]
    PlayerOutOfBounds(Uuid),

    /// Two players share an id.
    #[error("duplicate player id {0}")]
    DuplicatePlayer(Uuid),
}

/// Mutable match state guarded by the engine lock.
struct EngineState {
    maze: Maze,
    players: HashMap<Uuid, Player>,
    version: u64,
}

/// Endpoints the session layer keeps after constructing an engine.
pub struct EngineChannels {
    /// Feed of `[type_byte, ...payload]` action frames.
    pub action_tx: mpsc::Sender<Vec<u8>>,
    /// Encoded state snapshots, one per applied move or state request.
    pub state_rx: mpsc::Receiver<Vec<u8>>,
    /// The single final snapshot, sent when the match terminates.
    pub end_rx: mpsc::Receiver<Vec<u8>>,
    /// Stop handle for external termination.
    pub handle: EngineHandle,
}

/// Clonable handle that asks a running engine to terminate.
#[derive(Clone)]
pub struct EngineHandle {
    stop_tx: mpsc::Sender<()>,
}

impl EngineHandle {
    /// Request termination. Idempotent: late or repeated calls are no-ops.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }
}

/// Authoritative state machine for one match.
pub struct GameEngine {
    state: Arc<RwLock<EngineState>>,
    codec: Arc<dyn GameCodec>,
    action_rx: mpsc::Receiver<Vec<u8>>,
    state_tx: mpsc::Sender<Vec<u8>>,
    end_tx: mpsc::Sender<Vec<u8>>,
    stop_rx: mpsc::Receiver<()>,
}

impl GameEngine {
    /// Validate the match setup and wire the engine's channels.
    ///
    /// Starting cells never carry reward at match start; each player's spawn
    /// cell is cleared here.
    pub fn new(
        mut maze: Maze,
        players: Vec<Player>,
        codec: Arc<dyn GameCodec>,
    ) -> Result<(GameEngine, EngineChannels), GameError> {
        if players.len() > MAX_PLAYERS {
            return Err(GameError::TooManyPlayers(players.len()));
        }
        if players.len() < MIN_PLAYERS {
            return Err(GameError::NotEnoughPlayers(players.len()));
        }
        if maze.width() < MIN_DIMENSION || maze.height() < MIN_DIMENSION {
            return Err(GameError::MazeTooSmall {
                width: maze.width(),
                height: maze.height(),
            });
        }

        let mut by_id = HashMap::with_capacity(players.len());
        for player in players {
            let id = player.id;
            if !maze.in_bounds(player.pos) {
                return Err(GameError::PlayerOutOfBounds(id));
            }
            let _ = maze.take_reward(player.pos);
            if by_id.insert(id, player).is_some() {
                return Err(GameError::DuplicatePlayer(id));
            }
        }

        let (action_tx, action_rx) = mpsc::channel(ACTION_BUFFER);
        let (state_tx, state_rx) = mpsc::channel(STATE_BUFFER);
        let (end_tx, end_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let engine = GameEngine {
            state: Arc::new(RwLock::new(EngineState {
                maze,
                players: by_id,
                version: 0,
            })),
            codec,
            action_rx,
            state_tx,
            end_tx,
            stop_rx,
        };
        let channels = EngineChannels {
            action_tx,
            state_rx,
            end_rx,
            handle: EngineHandle { stop_tx },
        };
        Ok((engine, channels))
    }

    /// Drive the match until the duration elapses, rewards run out or a
    /// stop is requested. Consumes the engine; termination runs exactly
    /// once and emits the final snapshot on `end`.
    pub async fn run(mut self, duration: Duration) {
        let deadline = sleep(duration);
        tokio::pin!(deadline);

        let cause = loop {
            tokio::select! {
                _ = &mut deadline => break "duration elapsed",
                _ = self.stop_rx.recv() => break "stop requested",
                action = self.action_rx.recv() => match action {
                    Some(frame) => {
                        if self.handle_action(frame).await {
                            break "rewards exhausted";
                        }
                    }
                    None => break "action channel closed",
                },
            }
        };

        info!(cause, "game engine terminating");
        self.finish().await;
    }

    /// Dispatch one action frame. Returns true when the match is over.
    async fn handle_action(&mut self, frame: Vec<u8>) -> bool {
        let Some((&action_type, payload)) = frame.split_first() else {
            return false;
        };
        match action_type {
            record_type::STATE_REQUEST => {
                self.broadcast_state().await;
                false
            }
            record_type::MOVE => self.handle_move(payload).await,
            other => {
                debug!(action_type = other, "unknown action type dropped");
                false
            }
        }
    }

    /// Validate and apply one move. Every failure is recoverable and drops
    /// the action without touching state. Returns true when the move
    /// collected the last reward.
    async fn handle_move(&mut self, payload: &[u8]) -> bool {
        let action = match self.codec.unmarshal_action(payload) {
            Ok(action) => action,
            Err(e) => {
                debug!(error = %e, "undecodable move dropped");
                return false;
            }
        };

        let exhausted = {
            let mut state = self.state.write().await;

            let current = match state.players.get(&action.player_id) {
                Some(player) => player.pos,
                None => return false,
            };
            // Stale origin: the client is desynced or replaying.
            if current != action.from {
                debug!(player = %action.player_id, "move origin does not match position");
                return false;
            }

            let mv = match state.maze.valid_move(current, action.direction) {
                Ok(mv) => mv,
                Err(_) => return false,
            };

            let reward = match state.maze.apply_move(&mv) {
                Ok(reward) => reward,
                Err(_) => return false,
            };
            if let Some(player) = state.players.get_mut(&action.player_id) {
                player.pos = mv.to;
                player.reward += reward;
            }
            state.version += 1;

            state.maze.total_reward() == 0
        };

        if exhausted {
            return true;
        }
        self.broadcast_state().await;
        false
    }

    async fn broadcast_state(&self) {
        match snapshot_bytes(&self.state, self.codec.as_ref()).await {
            Ok(bytes) => {
                if self.state_tx.send(bytes).await.is_err() {
                    debug!("state channel closed, snapshot dropped");
                }
            }
            Err(e) => error!(error = %e, "failed to encode state snapshot"),
        }
    }

    /// Close the channels in order and emit the final snapshot: the action
    /// side first, then `state`, then the one `end` message.
    async fn finish(self) {
        let GameEngine {
            state,
            codec,
            action_rx,
            state_tx,
            end_tx,
            stop_rx,
        } = self;
        drop(stop_rx);
        drop(action_rx);
        drop(state_tx);

        match snapshot_bytes(&state, codec.as_ref()).await {
            Ok(bytes) => {
                let _ = end_tx.send(bytes).await;
            }
            Err(e) => error!(error = %e, "failed to encode final snapshot"),
        }
    }
}

/// Encode the current state. The read lock is released before returning,
/// so callers never hold it across a channel send.
async fn snapshot_bytes(
    state: &RwLock<EngineState>,
    codec: &dyn GameCodec,
) -> Result<Vec<u8>, CodecError> {
    let snapshot = {
        let state = state.read().await;
        let mut players: Vec<Player> = state.players.values().cloned().collect();
        players.sort_by_key(|p| p.id);
        GameState {
            version: state.version,
            maze: state.maze.clone(),
            players,
        }
    };
    codec.marshal_game_state(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Action, BincodeCodec};
    use crate::game::cell::{CellPosition, Direction};
    use std::time::Duration;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(200);

    fn codec() -> Arc<BincodeCodec> {
        Arc::new(BincodeCodec)
    }

    /// 3x3 open maze, one reward per cell, players in opposite corners.
    fn small_match() -> (Maze, Vec<Player>) {
        let mut maze = Maze::fully_open(3, 3);
        for row in 0..3 {
            for col in 0..3 {
                maze.set_reward(CellPosition::new(row, col), 1);
            }
        }
        let players = vec![
            Player::new(Uuid::new_v4(), CellPosition::new(0, 0)),
            Player::new(Uuid::new_v4(), CellPosition::new(2, 2)),
        ];
        (maze, players)
    }

    fn move_frame(codec: &BincodeCodec, player: Uuid, from: CellPosition, dir: Direction) -> Vec<u8> {
        let action = Action {
            player_id: player,
            from,
            direction: dir,
        };
        let mut frame = vec![record_type::MOVE];
        frame.extend(codec.marshal_action(&action).unwrap());
        frame
    }

    async fn next_state(
        codec: &BincodeCodec,
        rx: &mut mpsc::Receiver<Vec<u8>>,
    ) -> GameState {
        let bytes = timeout(TICK, rx.recv()).await.unwrap().unwrap();
        codec.unmarshal_game_state(&bytes).unwrap()
    }

    #[test]
    fn test_construction_validations() {
        let (maze, players) = small_match();

        let one = vec![players[0].clone()];
        assert!(matches!(
            GameEngine::new(maze.clone(), one, codec()),
            Err(GameError::NotEnoughPlayers(1))
        ));

        let five = (0..5)
            .map(|i| Player::new(Uuid::new_v4(), CellPosition::new(0, i)))
            .collect();
        assert!(matches!(
            GameEngine::new(maze.clone(), five, codec()),
            Err(GameError::TooManyPlayers(5))
        ));

        let tiny = Maze::fully_open(2, 3);
        assert!(matches!(
            GameEngine::new(tiny, players.clone(), codec()),
            Err(GameError::MazeTooSmall { .. })
        ));

        let outside = vec![
            Player::new(Uuid::new_v4(), CellPosition::new(0, 0)),
            Player::new(Uuid::new_v4(), CellPosition::new(9, 9)),
        ];
        assert!(matches!(
            GameEngine::new(maze.clone(), outside, codec()),
            Err(GameError::PlayerOutOfBounds(_))
        ));

        let twin = Uuid::new_v4();
        let dup = vec![
            Player::new(twin, CellPosition::new(0, 0)),
            Player::new(twin, CellPosition::new(2, 2)),
        ];
        assert!(matches!(
            GameEngine::new(maze, dup, codec()),
            Err(GameError::DuplicatePlayer(_))
        ));
    }

    #[tokio::test]
    async fn test_start_cells_cleared() {
        let (maze, players) = small_match();
        assert_eq!(maze.total_reward(), 9);

        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(5)));

        channels
            .action_tx
            .send(vec![record_type::STATE_REQUEST])
            .await
            .unwrap();
        let state = next_state(&BincodeCodec, &mut channels.state_rx).await;
        assert_eq!(state.version, 0);
        assert_eq!(state.maze.total_reward(), 7);
    }

    #[tokio::test]
    async fn test_move_collects_reward_and_bumps_version() {
        let (maze, players) = small_match();
        let mover = players[0].id;
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(5)));

        let frame = move_frame(&BincodeCodec, mover, CellPosition::new(0, 0), Direction::East);
        channels.action_tx.send(frame).await.unwrap();

        let state = next_state(&BincodeCodec, &mut channels.state_rx).await;
        assert_eq!(state.version, 1);
        let player = state.players.iter().find(|p| p.id == mover).unwrap();
        assert_eq!(player.pos, CellPosition::new(0, 1));
        assert_eq!(player.reward, 1);
        assert_eq!(state.maze.cell(CellPosition::new(0, 1)).unwrap().reward, 0);
    }

    #[tokio::test]
    async fn test_replayed_move_dropped() {
        let (maze, players) = small_match();
        let mover = players[0].id;
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(5)));

        // Capture one valid move frame and send it twice.
        let frame = move_frame(&BincodeCodec, mover, CellPosition::new(0, 0), Direction::East);
        channels.action_tx.send(frame.clone()).await.unwrap();
        let state = next_state(&BincodeCodec, &mut channels.state_rx).await;
        assert_eq!(state.version, 1);

        // The position has advanced, so the replayed origin is stale.
        channels.action_tx.send(frame).await.unwrap();
        assert!(timeout(TICK, channels.state_rx.recv()).await.is_err());

        channels
            .action_tx
            .send(vec![record_type::STATE_REQUEST])
            .await
            .unwrap();
        let state = next_state(&BincodeCodec, &mut channels.state_rx).await;
        assert_eq!(state.version, 1);
    }

    #[tokio::test]
    async fn test_invalid_and_garbage_actions_dropped() {
        let (maze, players) = small_match();
        let mover = players[0].id;
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(5)));

        // Off the grid.
        let frame = move_frame(&BincodeCodec, mover, CellPosition::new(0, 0), Direction::North);
        channels.action_tx.send(frame).await.unwrap();
        // Unknown player.
        let frame = move_frame(&BincodeCodec, Uuid::new_v4(), CellPosition::new(0, 0), Direction::East);
        channels.action_tx.send(frame).await.unwrap();
        // Undecodable payload and unknown type.
        channels.action_tx.send(vec![record_type::MOVE, 0xDE, 0xAD]).await.unwrap();
        channels.action_tx.send(vec![3, 1, 2]).await.unwrap();

        assert!(timeout(TICK, channels.state_rx.recv()).await.is_err());

        channels
            .action_tx
            .send(vec![record_type::STATE_REQUEST])
            .await
            .unwrap();
        let state = next_state(&BincodeCodec, &mut channels.state_rx).await;
        assert_eq!(state.version, 0);
    }

    #[tokio::test]
    async fn test_reward_conservation() {
        let (maze, players) = small_match();
        let initial = maze.total_reward() - 2; // spawn cells are cleared
        let mover = players[0].id;
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(5)));

        let mut pos = CellPosition::new(0, 0);
        for dir in [Direction::East, Direction::South, Direction::West] {
            let frame = move_frame(&BincodeCodec, mover, pos, dir);
            channels.action_tx.send(frame).await.unwrap();
            let state = next_state(&BincodeCodec, &mut channels.state_rx).await;

            let held: i64 = state.players.iter().map(|p| i64::from(p.reward)).sum();
            assert_eq!(held + state.maze.total_reward(), initial);
            pos = pos.step(dir).unwrap();
        }
    }

    #[tokio::test]
    async fn test_exhaustion_terminates_with_single_end() {
        let (maze, players) = small_match();
        let mover = players[0].id;
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(30)));

        // Snake through every remaining reward cell. The seventh move
        // collects the last reward and the engine closes its channels, so
        // the path stops there.
        let path = [
            Direction::East,
            Direction::East,
            Direction::South,
            Direction::West,
            Direction::West,
            Direction::South,
            Direction::East,
        ];
        let mut pos = CellPosition::new(0, 0);
        for dir in path {
            let frame = move_frame(&BincodeCodec, mover, pos, dir);
            channels.action_tx.send(frame).await.unwrap();
            pos = pos.step(dir).unwrap();
        }

        let bytes = timeout(Duration::from_secs(2), channels.end_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let last = BincodeCodec.unmarshal_game_state(&bytes).unwrap();
        assert_eq!(last.maze.total_reward(), 0);
        let held: i64 = last.players.iter().map(|p| i64::from(p.reward)).sum();
        assert_eq!(held, 7);

        // end closes after the single final snapshot; state is closed too.
        assert!(channels.end_rx.recv().await.is_none());
        while let Ok(Some(_)) = timeout(TICK, channels.state_rx.recv()).await {}
        assert!(timeout(TICK, channels.state_rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timeout_termination() {
        let (maze, players) = small_match();
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        let started = std::time::Instant::now();
        tokio::spawn(engine.run(Duration::from_millis(50)));

        let bytes = timeout(Duration::from_millis(500), channels.end_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));

        let last = BincodeCodec.unmarshal_game_state(&bytes).unwrap();
        assert_eq!(last.version, 0);
        assert!(channels.end_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_external_stop_is_idempotent() {
        let (maze, players) = small_match();
        let (engine, mut channels) = GameEngine::new(maze, players, codec()).unwrap();
        tokio::spawn(engine.run(Duration::from_secs(30)));

        channels.handle.stop();
        channels.handle.stop();

        let bytes = timeout(Duration::from_secs(1), channels.end_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(BincodeCodec.unmarshal_game_state(&bytes).is_ok());
        assert!(channels.end_rx.recv().await.is_none());

        // Stopping a dead engine is a no-op.
        channels.handle.stop();
    }
}
