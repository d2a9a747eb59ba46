//! Persistence and external collaborators

pub mod kv;
pub mod memory;
pub mod persist;
pub mod rest;
pub mod roster;
pub mod stats;

pub use kv::{KvStore, StoreError};
pub use memory::MemoryKvStore;
pub use persist::{Persistence, RetryPolicy};
pub use rest::RestKvStore;
pub use roster::{RestRoster, RosterProvider, StaticRoster};
pub use stats::{PlayerStats, RankedPlayer, StatsStore};
