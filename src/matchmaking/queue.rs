//! Matchmaking queue implementation

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ws::protocol::{PlayerData, PlayerId};

pub const DEFAULT_SKILL: i32 = 1000;
pub const DEFAULT_REGION: &str = "default";
pub const DEFAULT_MODE: &str = "solo";
/// Seconds of estimated wait per missing player
const WAIT_PER_MISSING_PLAYER_SECS: u64 = 30;

/// Player waiting for a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub player_id: PlayerId,
    pub joined_at: DateTime<Utc>,
    pub skill: i32,
    pub region: String,
    pub mode: String,
}

impl QueueEntry {
    pub fn new(player_id: PlayerId, data: &PlayerData, joined_at: DateTime<Utc>) -> Self {
        Self {
            player_id,
            joined_at,
            skill: data.skill.unwrap_or(DEFAULT_SKILL),
            region: data
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            mode: data
                .game_mode
                .clone()
                .unwrap_or_else(|| DEFAULT_MODE.to_string()),
        }
    }

    fn partition(&self) -> (&str, &str) {
        (&self.mode, &self.region)
    }
}

/// Players queued for one `(mode, region)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCount {
    pub mode: String,
    pub region: String,
    pub players: usize,
}

/// The matchmaking queue, kept in insertion order
pub struct MatchmakingQueue {
    entries: VecDeque<QueueEntry>,
    max_players: usize,
    skill_baseline: i32,
}

impl MatchmakingQueue {
    pub fn new(max_players: usize, skill_baseline: i32) -> Self {
        Self {
            entries: VecDeque::new(),
            max_players: max_players.max(2),
            skill_baseline,
        }
    }

    /// Add a player. Returns false if they already have an entry.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        if self.contains(&entry.player_id) {
            return false;
        }
        self.entries.push_back(entry);
        true
    }

    /// Remove a player. Returns false if they were not queued.
    pub fn dequeue(&mut self, player_id: &PlayerId) -> bool {
        match self.entries.iter().position(|e| &e.player_id == player_id) {
            Some(pos) => self.entries.remove(pos).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.entries.iter().any(|e| &e.player_id == player_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Pull players for one match out of the queue.
    ///
    /// Partitions are visited in the order their first entry was queued.
    /// Inside a partition, players closest to the skill baseline go first;
    /// ties keep queue order. A partition needs at least two players.
    pub fn take_match(&mut self) -> Option<Vec<QueueEntry>> {
        let mut partitions: Vec<(&str, &str)> = Vec::new();
        for entry in &self.entries {
            if !partitions.contains(&entry.partition()) {
                partitions.push(entry.partition());
            }
        }

        let chosen: Vec<PlayerId> = partitions.into_iter().find_map(|partition| {
            let mut members: Vec<&QueueEntry> = self
                .entries
                .iter()
                .filter(|e| e.partition() == partition)
                .collect();
            if members.len() < 2 {
                return None;
            }
            // sort_by_key is stable
            members.sort_by_key(|e| (i64::from(e.skill) - i64::from(self.skill_baseline)).abs());
            members.truncate(self.max_players);
            Some(members.into_iter().map(|e| e.player_id.clone()).collect())
        })?;

        let mut taken = Vec::with_capacity(chosen.len());
        for player_id in &chosen {
            if let Some(pos) = self.entries.iter().position(|e| &e.player_id == player_id) {
                taken.extend(self.entries.remove(pos));
            }
        }
        Some(taken)
    }

    /// Drop entries queued longer than `timeout`
    pub fn expire(&mut self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<QueueEntry> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| now - e.joined_at > timeout);
        self.entries = kept.into();
        expired
    }

    pub fn partition_counts(&self) -> Vec<PartitionCount> {
        let mut counts: Vec<PartitionCount> = Vec::new();
        for entry in &self.entries {
            match counts
                .iter_mut()
                .find(|c| c.mode == entry.mode && c.region == entry.region)
            {
                Some(count) => count.players += 1,
                None => counts.push(PartitionCount {
                    mode: entry.mode.clone(),
                    region: entry.region.clone(),
                    players: 1,
                }),
            }
        }
        counts
    }

    /// Rough wait for the next full match
    pub fn estimated_wait_secs(&self) -> u64 {
        if self.is_empty() || self.len() >= self.max_players {
            return 0;
        }
        (self.max_players - self.len()) as u64 * WAIT_PER_MISSING_PLAYER_SECS
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(10, DEFAULT_SKILL)
    }
}
