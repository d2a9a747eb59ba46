//! Matchmaking: a skill-sorted queue partitioned by mode and region

pub mod queue;
pub mod service;

pub use queue::{MatchmakingQueue, PartitionCount, QueueEntry};
pub use service::{JoinOutcome, MatchmakingService, QueueStatus};
