//! Session registry.
//!
//! Process-wide map from authenticated players to running game engines.
//! The registry owns session lifecycle end to end: it assembles a maze and
//! engine per match, runs a fan-out task that multicasts engine output, and
//! tears the session down when the engine emits its final snapshot.
//!
//! The registry is also the transport's [`TokenAuthenticator`]: a session
//! token is the 16 raw bytes of a player UUID, valid while that player has
//! an active session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{record_type, GameCodec};
use crate::config::SessionConfig;
use crate::game::cell::CellPosition;
use crate::game::engine::{EngineChannels, EngineHandle, GameEngine, GameError};
use crate::game::maze::{Maze, MazeError};
use crate::game::player::Player;
use crate::game::reward::{self, RewardError};
use crate::transport::{GameTransport, TokenAuthenticator, TransportError};

/// Builds a maze for a new session.
pub type MazeFactory = Arc<dyn Fn(u16, u16) -> Result<Maze, MazeError> + Send + Sync>;

/// Registry errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// More players than the configured maximum.
    #[error("too many players in game session: {0}")]
    TooManyPlayers(usize),

    /// The player has no active session.
    #[error("player has no game session")]
    NoSession,

    /// Maze construction failed.
    #[error(transparent)]
    Maze(#[from] MazeError),

    /// Reward placement failed.
    #[error(transparent)]
    Reward(#[from] RewardError),

    /// Engine construction failed.
    #[error(transparent)]
    Game(#[from] GameError),
}

struct SessionEntry {
    action_tx: mpsc::Sender<Vec<u8>>,
    handle: EngineHandle,
    players: Vec<Uuid>,
}

#[derive(Default)]
struct Maps {
    sessions: HashMap<Uuid, SessionEntry>,
    player_to_session: HashMap<Uuid, Uuid>,
}

/// Maps players to sessions and sessions to engines.
pub struct SessionRegistry {
    transport: Arc<dyn GameTransport>,
    codec: Arc<dyn GameCodec>,
    maze_factory: MazeFactory,
    config: SessionConfig,
    maps: RwLock<Maps>,
}

impl SessionRegistry {
    /// Assemble a registry over a transport and codec.
    pub fn new(
        transport: Arc<dyn GameTransport>,
        codec: Arc<dyn GameCodec>,
        maze_factory: MazeFactory,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            codec,
            maze_factory,
            config,
            maps: RwLock::new(Maps::default()),
        })
    }

    /// Corner spawn points in claim order, truncated to the player count.
    fn spawn_positions(width: u16, height: u16) -> [CellPosition; 4] {
        [
            CellPosition::new(0, 0),
            CellPosition::new(height - 1, width - 1),
            CellPosition::new(height - 1, 0),
            CellPosition::new(0, width - 1),
        ]
    }

    /// Build and start a session for a matched group of players.
    ///
    /// The engine starts immediately with the configured duration and a
    /// dedicated fan-out task begins multicasting its output.
    pub fn new_session(self: &Arc<Self>, player_ids: Vec<Uuid>) -> Result<Uuid, SessionError> {
        if player_ids.len() > self.config.max_players
            || player_ids.len() > crate::game::MAX_PLAYERS
        {
            return Err(SessionError::TooManyPlayers(player_ids.len()));
        }

        // The factory validates the dimensions before the corners are
        // computed from them.
        let mut maze = (self.maze_factory)(self.config.maze_width, self.config.maze_height)?;
        reward::distribute(self.config.rewards, &mut maze, &mut StdRng::from_entropy())?;

        let corners = Self::spawn_positions(maze.width(), maze.height());
        let players: Vec<Player> = player_ids
            .iter()
            .zip(corners)
            .map(|(id, pos)| Player::new(*id, pos))
            .collect();

        let (engine, channels) = GameEngine::new(maze, players, Arc::clone(&self.codec))?;
        let EngineChannels {
            action_tx,
            state_rx,
            end_rx,
            handle,
        } = channels;

        let session_id = {
            let mut maps = self.maps.write();
            let mut id = Uuid::new_v4();
            while maps.sessions.contains_key(&id) {
                id = Uuid::new_v4();
            }
            maps.sessions.insert(
                id,
                SessionEntry {
                    action_tx,
                    handle,
                    players: player_ids.clone(),
                },
            );
            for player in &player_ids {
                maps.player_to_session.insert(*player, id);
            }
            id
        };

        tokio::spawn(engine.run(self.config.game_duration));
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.fan_out(session_id, state_rx, end_rx).await;
        });

        info!(session = %session_id, players = ?player_ids, "started new game session");
        Ok(session_id)
    }

    /// Multicast engine output to the session's players until the engine
    /// terminates, then broadcast the final snapshot and clean up.
    ///
    /// The engine closes `state` before sending on `end`, so draining
    /// `state` to exhaustion first preserves snapshot order.
    async fn fan_out(
        self: Arc<Self>,
        session_id: Uuid,
        mut state_rx: mpsc::Receiver<Vec<u8>>,
        mut end_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let players = self
            .maps
            .read()
            .sessions
            .get(&session_id)
            .map(|entry| entry.players.clone())
            .unwrap_or_default();

        while let Some(snapshot) = state_rx.recv().await {
            self.transport
                .broadcast(&players, record_type::GAME_STATE, &snapshot);
        }
        if let Some(snapshot) = end_rx.recv().await {
            self.transport
                .broadcast(&players, record_type::GAME_ENDED, &snapshot);
        }

        self.clean(session_id);
    }

    fn clean(&self, session_id: Uuid) {
        let mut maps = self.maps.write();
        if let Some(entry) = maps.sessions.remove(&session_id) {
            for player in entry.players {
                maps.player_to_session.remove(&player);
            }
        }
        debug!(session = %session_id, "session cleaned up");
    }

    /// Handshake bootstrap data for a player's client: the transport's
    /// public key and bind address. Fails without an active session.
    pub fn session_info(&self, player: &Uuid) -> Result<(Vec<u8>, SocketAddr), SessionError> {
        if !self.maps.read().player_to_session.contains_key(player) {
            return Err(SessionError::NoSession);
        }
        Ok((self.transport.public_key(), self.transport.local_addr()))
    }

    /// Route an authenticated application record into the owning engine's
    /// action queue as `[record_type, ...body]`. Records for players
    /// without a session are dropped.
    pub fn on_client_request(&self, player: Uuid, record_kind: u8, body: &[u8]) {
        let maps = self.maps.read();
        let Some(session_id) = maps.player_to_session.get(&player) else {
            debug!(player = %player, "request for player without session dropped");
            return;
        };
        let Some(entry) = maps.sessions.get(session_id) else {
            return;
        };

        let mut action = Vec::with_capacity(1 + body.len());
        action.push(record_kind);
        action.extend_from_slice(body);
        if let Err(e) = entry.action_tx.try_send(action) {
            warn!(player = %player, error = %e, "action queue rejected record");
        }
    }

    /// Best-effort stop of every running engine, for shutdown. Cleanup
    /// still happens through each session's fan-out task.
    pub fn stop_all(&self) {
        let handles: Vec<EngineHandle> = self
            .maps
            .read()
            .sessions
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        info!(sessions = handles.len(), "stopping all game sessions");
        for handle in handles {
            handle.stop();
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.maps.read().sessions.len()
    }

    /// The session a player currently belongs to.
    pub fn session_of(&self, player: &Uuid) -> Option<Uuid> {
        self.maps.read().player_to_session.get(player).copied()
    }
}

impl TokenAuthenticator for SessionRegistry {
    fn authenticate(&self, token: &[u8]) -> Result<Uuid, TransportError> {
        let id = Uuid::from_slice(token).map_err(|_| {
            error!("invalid token provided");
            TransportError::AuthenticationFailed
        })?;
        if self.maps.read().player_to_session.contains_key(&id) {
            info!(player = %id, "authenticated player");
            Ok(id)
        } else {
            warn!(player = %id, "player does not have a game session");
            Err(TransportError::AuthenticationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Action, BincodeCodec, GameState};
    use crate::game::cell::Direction;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Transport stub that forwards every broadcast to a channel.
    struct RecordingTransport {
        sent: mpsc::UnboundedSender<(Vec<Uuid>, u8, Vec<u8>)>,
    }

    impl GameTransport for RecordingTransport {
        fn broadcast(&self, players: &[Uuid], record_kind: u8, payload: &[u8]) {
            let _ = self
                .sent
                .send((players.to_vec(), record_kind, payload.to_vec()));
        }

        fn public_key(&self) -> Vec<u8> {
            vec![0xCD; 8]
        }

        fn local_addr(&self) -> SocketAddr {
            "127.0.0.1:4000".parse().unwrap()
        }
    }

    struct Harness {
        registry: Arc<SessionRegistry>,
        broadcasts: mpsc::UnboundedReceiver<(Vec<Uuid>, u8, Vec<u8>)>,
    }

    fn harness(config: SessionConfig) -> Harness {
        let (sent, broadcasts) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(
            Arc::new(RecordingTransport { sent }),
            Arc::new(BincodeCodec),
            Arc::new(|w, h| Maze::generate_seeded(w, h, 2024)),
            config,
        );
        Harness {
            registry,
            broadcasts,
        }
    }

    fn small_config() -> SessionConfig {
        SessionConfig {
            maze_width: 5,
            maze_height: 4,
            ..Default::default()
        }
    }

    async fn recv_broadcast(
        rx: &mut mpsc::UnboundedReceiver<(Vec<Uuid>, u8, Vec<u8>)>,
    ) -> (Vec<Uuid>, u8, Vec<u8>) {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_session_registers_players() {
        let h = harness(small_config());
        let players = vec![Uuid::new_v4(), Uuid::new_v4()];
        let session = h.registry.new_session(players.clone()).unwrap();

        assert_eq!(h.registry.session_count(), 1);
        assert_eq!(h.registry.session_of(&players[0]), Some(session));
        assert_eq!(h.registry.session_of(&players[1]), Some(session));
    }

    #[tokio::test]
    async fn test_too_many_players_rejected() {
        let h = harness(small_config());
        let players = (0..3).map(|_| Uuid::new_v4()).collect();
        assert!(matches!(
            h.registry.new_session(players),
            Err(SessionError::TooManyPlayers(3))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_requires_session() {
        let h = harness(small_config());
        let player = Uuid::new_v4();

        assert!(h.registry.authenticate(player.as_bytes()).is_err());
        assert!(h.registry.authenticate(b"short").is_err());

        h.registry.new_session(vec![player, Uuid::new_v4()]).unwrap();
        assert_eq!(h.registry.authenticate(player.as_bytes()).unwrap(), player);
    }

    #[tokio::test]
    async fn test_session_info() {
        let h = harness(small_config());
        let player = Uuid::new_v4();
        assert!(matches!(
            h.registry.session_info(&player),
            Err(SessionError::NoSession)
        ));

        h.registry.new_session(vec![player, Uuid::new_v4()]).unwrap();
        let (key, addr) = h.registry.session_info(&player).unwrap();
        assert_eq!(key, vec![0xCD; 8]);
        assert_eq!(addr, "127.0.0.1:4000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_request_routing_to_owning_engine() {
        let mut h = harness(small_config());
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let session_one = h.registry.new_session(vec![p1, Uuid::new_v4()]).unwrap();
        h.registry.new_session(vec![p2, Uuid::new_v4()]).unwrap();

        h.registry
            .on_client_request(p1, record_type::STATE_REQUEST, &[]);

        // Only the first session's players see the snapshot.
        let (targets, kind, payload) = recv_broadcast(&mut h.broadcasts).await;
        assert_eq!(kind, record_type::GAME_STATE);
        assert!(targets.contains(&p1));
        assert!(!targets.contains(&p2));
        assert_eq!(
            h.registry.session_of(&targets[0]),
            Some(session_one)
        );
        assert!(BincodeCodec.unmarshal_game_state(&payload).is_ok());
    }

    #[tokio::test]
    async fn test_request_without_session_dropped() {
        let h = harness(small_config());
        // Must not panic or broadcast.
        h.registry
            .on_client_request(Uuid::new_v4(), record_type::STATE_REQUEST, &[]);
    }

    #[tokio::test]
    async fn test_move_advances_engine_state() {
        let mut h = harness(small_config());
        let p1 = Uuid::new_v4();
        h.registry.new_session(vec![p1, Uuid::new_v4()]).unwrap();

        // Find a legal first move from the deterministic maze.
        let maze = Maze::generate_seeded(5, 4, 2024).unwrap();
        let origin = CellPosition::new(0, 0);
        let direction = Direction::ALL
            .into_iter()
            .find(|&d| maze.valid_move(origin, d).is_ok())
            .expect("spanning maze has an exit from the corner");

        let action = Action {
            player_id: p1,
            from: origin,
            direction,
        };
        let body = BincodeCodec.marshal_action(&action).unwrap();
        h.registry.on_client_request(p1, record_type::MOVE, &body);

        let (_, kind, payload) = recv_broadcast(&mut h.broadcasts).await;
        assert_eq!(kind, record_type::GAME_STATE);
        let state: GameState = BincodeCodec.unmarshal_game_state(&payload).unwrap();
        assert_eq!(state.version, 1);
        let moved = state.players.iter().find(|p| p.id == p1).unwrap();
        assert_ne!(moved.pos, origin);
    }

    #[tokio::test]
    async fn test_stop_all_emits_game_ended_and_cleans_up() {
        let mut h = harness(small_config());
        let p1 = Uuid::new_v4();
        h.registry.new_session(vec![p1, Uuid::new_v4()]).unwrap();

        h.registry.stop_all();

        let (targets, kind, payload) = recv_broadcast(&mut h.broadcasts).await;
        assert_eq!(kind, record_type::GAME_ENDED);
        assert!(targets.contains(&p1));
        assert!(BincodeCodec.unmarshal_game_state(&payload).is_ok());

        // No snapshot follows the final one.
        assert!(
            timeout(Duration::from_millis(200), h.broadcasts.recv())
                .await
                .is_err()
        );

        // Cleanup drops both map sides; the token stops authenticating.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while h.registry.session_count() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "session never cleaned");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.registry.session_of(&p1), None);
        assert!(h.registry.authenticate(p1.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn test_player_in_exactly_one_session() {
        let h = harness(small_config());
        let mut all_players = Vec::new();
        for _ in 0..3 {
            let pair = vec![Uuid::new_v4(), Uuid::new_v4()];
            all_players.extend(pair.clone());
            h.registry.new_session(pair).unwrap();
        }

        let maps = h.registry.maps.read();
        for player in &all_players {
            let owning: Vec<Uuid> = maps
                .sessions
                .iter()
                .filter(|(_, entry)| entry.players.contains(player))
                .map(|(id, _)| *id)
                .collect();
            assert_eq!(owning.len(), 1);
            assert_eq!(maps.player_to_session.get(player), Some(&owning[0]));
        }
    }
}
