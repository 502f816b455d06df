//! Sorted queue contract and in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Queue errors. The in-memory queue never fails, but remote backings do.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store is unreachable or misbehaving.
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// A score-ordered queue partitioned by bucket key.
///
/// Scores are nanosecond enqueue timestamps, so the lowest score is the
/// earliest-enqueued member and pops are FIFO within a bucket.
#[async_trait]
pub trait SortedQueue: Send + Sync {
    /// Insert `member` with `score`, or update its score if present.
    async fn enqueue(&self, key: &str, score: i64, member: &str) -> Result<(), QueueError>;

    /// Current number of members under `key`.
    async fn count(&self, key: &str) -> Result<usize, QueueError>;

    /// Atomically remove and return the `n` lowest-scoring members, or an
    /// empty vec when fewer than `n` are queued. Concurrent callers for the
    /// same key are serialized, so two match triggers can never split one
    /// group.
    async fn deque_tops(&self, key: &str, n: usize) -> Result<Vec<String>, QueueError>;
}

#[derive(Default)]
struct Bucket {
    entries: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
    expires_at: Option<Instant>,
}

impl Bucket {
    fn expire_if_stale(&mut self) {
        if let Some(expires_at) = self.expires_at {
            if Instant::now() >= expires_at {
                self.entries.clear();
                self.scores.clear();
                self.expires_at = None;
            }
        }
    }

    fn touch(&mut self, ttl: Option<Duration>) {
        self.expires_at = ttl.map(|ttl| Instant::now() + ttl);
    }
}

/// In-process [`SortedQueue`] with a mutex per bucket and optional TTL on
/// bucket keys, mirroring a sorted-set store with per-key locking.
pub struct InMemorySortedQueue {
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
    ttl: Option<Duration>,
}

impl InMemorySortedQueue {
    /// Queue whose buckets never expire.
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Queue whose buckets self-expire `ttl` after their last touch.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    async fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().await.get(key) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write().await;
        Arc::clone(buckets.entry(key.to_string()).or_default())
    }
}

impl Default for InMemorySortedQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SortedQueue for InMemorySortedQueue {
    async fn enqueue(&self, key: &str, score: i64, member: &str) -> Result<(), QueueError> {
        let bucket = self.bucket(key).await;
        let mut bucket = bucket.lock().await;
        bucket.expire_if_stale();

        if let Some(old) = bucket.scores.insert(member.to_string(), score) {
            bucket.entries.remove(&(old, member.to_string()));
        }
        bucket.entries.insert((score, member.to_string()));
        bucket.touch(self.ttl);
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<usize, QueueError> {
        let bucket = self.bucket(key).await;
        let mut bucket = bucket.lock().await;
        bucket.expire_if_stale();
        Ok(bucket.entries.len())
    }

    async fn deque_tops(&self, key: &str, n: usize) -> Result<Vec<String>, QueueError> {
        let bucket = self.bucket(key).await;
        let mut bucket = bucket.lock().await;
        bucket.expire_if_stale();

        if bucket.entries.len() < n {
            return Ok(Vec::new());
        }
        let mut members = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(first) = bucket.entries.iter().next().cloned() else {
                break;
            };
            bucket.entries.remove(&first);
            bucket.scores.remove(&first.1);
            members.push(first.1);
        }
        bucket.touch(self.ttl);
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_within_bucket() {
        let queue = InMemorySortedQueue::new();
        queue.enqueue("b", 30, "third").await.unwrap();
        queue.enqueue("b", 10, "first").await.unwrap();
        queue.enqueue("b", 20, "second").await.unwrap();

        assert_eq!(queue.count("b").await.unwrap(), 3);
        let popped = queue.deque_tops("b", 2).await.unwrap();
        assert_eq!(popped, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(queue.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_short_bucket_pops_nothing() {
        let queue = InMemorySortedQueue::new();
        queue.enqueue("b", 1, "only").await.unwrap();

        assert!(queue.deque_tops("b", 2).await.unwrap().is_empty());
        // The lone member is untouched.
        assert_eq!(queue.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_updates_score() {
        let queue = InMemorySortedQueue::new();
        queue.enqueue("b", 10, "a").await.unwrap();
        queue.enqueue("b", 20, "z").await.unwrap();
        // Re-enqueueing "a" with a later score moves it behind "z".
        queue.enqueue("b", 30, "a").await.unwrap();

        assert_eq!(queue.count("b").await.unwrap(), 2);
        let popped = queue.deque_tops("b", 2).await.unwrap();
        assert_eq!(popped, vec!["z".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let queue = InMemorySortedQueue::new();
        queue.enqueue("rank_1", 1, "a").await.unwrap();
        queue.enqueue("rank_2", 1, "b").await.unwrap();

        assert_eq!(queue.count("rank_1").await.unwrap(), 1);
        assert_eq!(queue.count("rank_2").await.unwrap(), 1);

        let popped = queue.deque_tops("rank_1", 1).await.unwrap();
        assert_eq!(popped, vec!["a".to_string()]);
        assert_eq!(queue.count("rank_2").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_ttl_expiry() {
        let queue = InMemorySortedQueue::with_ttl(Duration::from_secs(60));
        queue.enqueue("b", 1, "a").await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(queue.count("b").await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(queue.count("b").await.unwrap(), 0);
        assert!(queue.deque_tops("b", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_dequeues_never_split_members() {
        let queue = Arc::new(InMemorySortedQueue::new());
        for i in 0..4 {
            queue.enqueue("b", i, &format!("p{i}")).await.unwrap();
        }

        let a = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.deque_tops("b", 4).await.unwrap() }
        });
        let b = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.deque_tops("b", 4).await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        // Exactly one caller wins the whole group.
        assert!(a.len() == 4 && b.is_empty() || b.len() == 4 && a.is_empty());
    }
}
