//! Matchmaking
//!
//! Rank/latency-bucketed FIFO queue plus the matchmaker that assembles
//! fixed-size matches from it. The queue is behind the [`SortedQueue`]
//! trait because production deployments may back it with a remote
//! sorted-set store; the in-memory implementation honors the same
//! contract, including per-bucket serialization of dequeues.

pub mod matchmaker;
pub mod queue;

pub use matchmaker::{MatchHandler, Matchmaker};
pub use queue::{InMemorySortedQueue, QueueError, SortedQueue};
