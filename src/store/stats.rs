//! Aggregate per-player statistics fed by match results

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::PlayerResult;
use crate::ws::protocol::PlayerId;

use super::persist::Persistence;

/// Lifetime stats for one player
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub matches_played: u32,
    pub wins: u32,
    pub kills: u32,
    pub deaths: u32,
    pub last_played: Option<DateTime<Utc>>,
    /// Percentage, two decimals
    pub win_rate: f64,
    /// Kills per death; equals kills while deathless
    pub kd_ratio: f64,
}

impl PlayerStats {
    pub fn apply(&mut self, result: &PlayerResult, at: DateTime<Utc>) {
        self.matches_played += 1;
        self.last_played = Some(at);
        if result.won {
            self.wins += 1;
        }
        self.kills += result.kills;
        if result.died {
            self.deaths += 1;
        }

        self.win_rate = round2(f64::from(self.wins) / f64::from(self.matches_played) * 100.0);
        self.kd_ratio = if self.deaths > 0 {
            round2(f64::from(self.kills) / f64::from(self.deaths))
        } else {
            f64::from(self.kills)
        };
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn stats_key(player_id: &PlayerId) -> String {
    format!("stats:{}", player_id)
}

/// Stats collaborator: cached in memory, mirrored to the store
#[derive(Clone)]
pub struct StatsStore {
    cache: Arc<DashMap<PlayerId, PlayerStats>>,
    persistence: Persistence,
}

impl StatsStore {
    pub fn new(persistence: Persistence) -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            persistence,
        }
    }

    /// Fold one match result into the player's totals
    pub async fn record(
        &self,
        player_id: &PlayerId,
        result: &PlayerResult,
        at: DateTime<Utc>,
    ) -> PlayerStats {
        if !self.cache.contains_key(player_id) {
            // Seed from the mirrored record so earlier totals carry over
            self.get(player_id).await;
        }

        let mut entry = self.cache.entry(player_id.clone()).or_default();
        entry.apply(result, at);
        let updated = entry.clone();
        drop(entry);

        self.persistence.set_json(stats_key(player_id), &updated, None);
        debug!(player_id = %player_id, matches = updated.matches_played, "Recorded match result");
        updated
    }

    /// Current totals, loading from the store on a cache miss
    pub async fn get(&self, player_id: &PlayerId) -> PlayerStats {
        if let Some(stats) = self.cache.get(player_id) {
            return stats.clone();
        }

        let Some(store) = self.persistence.store() else {
            return PlayerStats::default();
        };

        match store.get(&stats_key(player_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<PlayerStats>(&raw) {
                Ok(stats) => self
                    .cache
                    .entry(player_id.clone())
                    .or_insert(stats)
                    .clone(),
                Err(e) => {
                    warn!(player_id = %player_id, error = %e, "Discarding malformed stats record");
                    PlayerStats::default()
                }
            },
            Ok(None) => PlayerStats::default(),
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Stats lookup failed, serving defaults");
                PlayerStats::default()
            }
        }
    }

    /// Top players by wins, across every mirrored record
    pub async fn leaderboard(&self, limit: usize) -> Vec<RankedPlayer> {
        if let Some(store) = self.persistence.store() {
            match store.keys("stats:*").await {
                Ok(keys) => {
                    for key in keys {
                        let Some(id) = key.strip_prefix("stats:") else {
                            continue;
                        };
                        let player_id = PlayerId::from(id);
                        if !self.cache.contains_key(&player_id) {
                            self.get(&player_id).await;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Leaderboard limited to cached stats"),
            }
        }

        let mut ranked: Vec<RankedPlayer> = self
            .cache
            .iter()
            .map(|entry| RankedPlayer {
                player_id: entry.key().clone(),
                stats: entry.value().clone(),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.stats
                .wins
                .cmp(&a.stats.wins)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        ranked.truncate(limit);
        ranked
    }
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPlayer {
    pub player_id: PlayerId,
    #[serde(flatten)]
    pub stats: PlayerStats,
}
