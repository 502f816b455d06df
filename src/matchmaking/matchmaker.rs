//! Matchmaker.
//!
//! Players enter a bucket keyed by scaled rank and latency; every enqueue
//! checks its own bucket and, once the bucket holds a full match, pops the
//! earliest players and hands them to the configured handler.

use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MatchmakingConfig;
use crate::matchmaking::queue::{QueueError, SortedQueue};

/// Called with the matched players, in enqueue order. Fire-and-forget:
/// failures inside the handler are the handler's problem.
pub type MatchHandler = Arc<dyn Fn(Vec<Uuid>) + Send + Sync>;

/// Groups players of similar rank and latency into fixed-size matches.
pub struct Matchmaker {
    queue: Arc<dyn SortedQueue>,
    config: MatchmakingConfig,
    handler: OnceLock<MatchHandler>,
}

impl Matchmaker {
    /// Assemble a matchmaker over a sorted queue.
    pub fn new(queue: Arc<dyn SortedQueue>, config: MatchmakingConfig) -> Arc<Self> {
        Arc::new(Self {
            queue,
            config,
            handler: OnceLock::new(),
        })
    }

    /// Install the match handler. Must happen before the first enqueue.
    pub fn set_match_handler(&self, handler: MatchHandler) {
        let _ = self.handler.set(handler);
    }

    /// Add a player to its bucket and trigger match assembly for that
    /// bucket in the background.
    pub async fn enqueue(
        self: &Arc<Self>,
        player: Uuid,
        rank: u32,
        latency: u32,
    ) -> Result<(), QueueError> {
        let key = self.bucket_key(rank, latency);
        self.queue
            .enqueue(&key, enqueue_score(), &player.to_string())
            .await?;
        info!(player = %player, rank, latency, key = %key, "player enqueued");

        let matchmaker = Arc::clone(self);
        tokio::spawn(async move {
            matchmaker.try_match(&key).await;
        });
        Ok(())
    }

    /// Pop a full match from `key` if one is ready and invoke the handler.
    ///
    /// Members that fail to parse as UUIDs are logged and dropped; a group
    /// left short by such drops is aborted and the surviving players are
    /// re-enqueued with fresh scores, preserving their relative order.
    async fn try_match(&self, key: &str) {
        let needed = self.config.max_players;
        match self.queue.count(key).await {
            Ok(count) if count >= needed => {}
            Ok(_) => return,
            Err(e) => {
                error!(key = %key, error = %e, "queue count failed");
                return;
            }
        }

        let members = match self.queue.deque_tops(key, needed).await {
            Ok(members) => members,
            Err(e) => {
                error!(key = %key, error = %e, "queue pop failed");
                return;
            }
        };
        if members.is_empty() {
            // A concurrent trigger won the bucket.
            return;
        }

        let mut players = Vec::with_capacity(members.len());
        for member in &members {
            match Uuid::parse_str(member) {
                Ok(id) => players.push(id),
                Err(_) => warn!(member = %member, "non-uuid member in queue, dropped"),
            }
        }

        if players.len() == needed {
            info!(?players, "match found");
            match self.handler.get() {
                Some(handler) => handler(players),
                None => warn!("no match handler configured, match dropped"),
            }
        } else if !players.is_empty() {
            warn!(
                valid = players.len(),
                needed, "short match aborted, re-enqueueing players"
            );
            for player in players {
                if let Err(e) = self
                    .queue
                    .enqueue(key, enqueue_score(), &player.to_string())
                    .await
                {
                    error!(player = %player, error = %e, "re-enqueue failed");
                }
            }
        }
    }

    /// Bucket key: tolerances widen the bucket by scaling values down.
    fn bucket_key(&self, rank: u32, latency: u32) -> String {
        debug!(rank, latency, "computing bucket key");
        format!(
            "{}:queue:rank_{}:latency_{}",
            self.config.queue_prefix,
            scale(rank, self.config.rank_tolerance),
            scale(latency, self.config.latency_tolerance)
        )
    }
}

fn scale(value: u32, tolerance: u32) -> u32 {
    value / (tolerance + 1)
}

/// Nanosecond enqueue timestamp; the high resolution breaks score ties so
/// the earliest enqueue wins on pop.
fn enqueue_score() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
