//! Authoritative state of one match and its lifecycle
//!
//! `waiting -> active -> finished`, with `finished` terminal. All mutation
//! goes through `GameSession` methods; callers serialize access through
//! [`SessionManager`](super::SessionManager).

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anticheat::HitSample;
use crate::error::{GameError, GameResult};
use crate::ws::protocol::{PlayerId, Vec3};

pub const DEFAULT_HEALTH: f64 = 100.0;
pub const DEFAULT_SHIELD: f64 = 0.0;
pub const MAX_HEALTH: f64 = 100.0;
pub const MAX_SHIELD: f64 = 100.0;

/// Radius of the ring players spawn on
const SPAWN_RING_RADIUS: f64 = 500.0;
/// Hit samples kept per player for accuracy checks
const HIT_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Finished,
}

/// Per-player combat state inside a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub is_alive: bool,
    pub kills: u32,
    pub position: Vec3,
    pub health: f64,
    pub shield: f64,
    pub weapons: Vec<String>,
    pub last_update: DateTime<Utc>,
    pub eliminated_at: Option<DateTime<Utc>>,
    /// 1 for the first player eliminated in the session, 2 for the next...
    pub elimination_order: Option<u32>,

    #[serde(skip)]
    pub recent_shots: VecDeque<DateTime<Utc>>,
    #[serde(skip)]
    pub recent_hits: VecDeque<HitSample>,
}

impl PlayerState {
    fn spawn(position: Vec3, now: DateTime<Utc>) -> Self {
        Self {
            is_alive: true,
            kills: 0,
            position,
            health: DEFAULT_HEALTH,
            shield: DEFAULT_SHIELD,
            weapons: Vec::new(),
            last_update: now,
            eliminated_at: None,
            elimination_order: None,
            recent_shots: VecDeque::new(),
            recent_hits: VecDeque::new(),
        }
    }
}

/// Partial update merged by [`GameSession::update_player`]
#[derive(Debug, Clone, Default)]
pub struct PlayerUpdate {
    pub position: Option<Vec3>,
    pub health: Option<f64>,
    pub shield: Option<f64>,
    pub weapons: Option<Vec<String>>,
}

impl PlayerUpdate {
    pub fn validate(&self) -> GameResult<()> {
        if let Some(position) = &self.position {
            if !position.is_finite() {
                return Err(GameError::Validation("position must be finite".into()));
            }
        }
        if let Some(health) = self.health {
            if !(0.0..=MAX_HEALTH).contains(&health) {
                return Err(GameError::Validation(format!(
                    "health must be within 0..={MAX_HEALTH}"
                )));
            }
        }
        if let Some(shield) = self.shield {
            if !(0.0..=MAX_SHIELD).contains(&shield) {
                return Err(GameError::Validation(format!(
                    "shield must be within 0..={MAX_SHIELD}"
                )));
            }
        }
        Ok(())
    }
}

/// Movement delta captured while applying an update
#[derive(Debug, Clone, Copy)]
pub struct Movement {
    pub from: Vec3,
    pub to: Vec3,
    pub elapsed: chrono::Duration,
}

/// Outcome of a zone step
#[derive(Debug, Clone)]
pub struct ZoneProgress {
    pub current_zone: u32,
    pub max_zones: u32,
    /// Set only by the step that finished the session
    pub results: Option<MatchResults>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub won: bool,
    pub kills: u32,
    pub died: bool,
    pub placement: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResults {
    pub session_id: Uuid,
    pub winner: Option<PlayerId>,
    pub duration_secs: i64,
    pub player_results: BTreeMap<PlayerId, PlayerResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub placement: u32,
    pub kills: u32,
}

impl MatchResults {
    /// Best placement first, then most kills, then player id
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut board: Vec<LeaderboardEntry> = self
            .player_results
            .iter()
            .map(|(player_id, r)| LeaderboardEntry {
                player_id: player_id.clone(),
                placement: r.placement,
                kills: r.kills,
            })
            .collect();
        board.sort_by(|a, b| {
            a.placement
                .cmp(&b.placement)
                .then(b.kills.cmp(&a.kills))
                .then(a.player_id.cmp(&b.player_id))
        });
        board
    }
}

/// One match
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub session_id: Uuid,
    /// Fixed at creation, in matchmaking order
    pub players: Vec<PlayerId>,
    pub status: SessionStatus,
    pub current_zone: u32,
    pub max_zones: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub player_states: BTreeMap<PlayerId, PlayerState>,
    /// Spawn layout seed
    pub seed: u64,

    #[serde(skip)]
    present: HashSet<PlayerId>,
    #[serde(skip)]
    eliminations: u32,
}

impl GameSession {
    pub fn new(
        session_id: Uuid,
        players: Vec<PlayerId>,
        max_zones: u32,
        seed: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let spawns = spawn_ring(seed, players.len());
        let player_states = players
            .iter()
            .cloned()
            .zip(spawns)
            .map(|(id, position)| (id, PlayerState::spawn(position, now)))
            .collect();

        Self {
            session_id,
            players,
            status: SessionStatus::Waiting,
            current_zone: 1,
            max_zones: max_zones.max(1),
            created_at: now,
            started_at: None,
            ended_at: None,
            player_states,
            seed,
            present: HashSet::new(),
            eliminations: 0,
        }
    }

    pub fn is_member(&self, player_id: &PlayerId) -> bool {
        self.player_states.contains_key(player_id)
    }

    pub fn player(&self, player_id: &PlayerId) -> Option<&PlayerState> {
        self.player_states.get(player_id)
    }

    fn player_mut(&mut self, player_id: &PlayerId) -> GameResult<&mut PlayerState> {
        self.player_states
            .get_mut(player_id)
            .ok_or_else(|| GameError::NotFound(format!("player {player_id} in session")))
    }

    pub fn alive_players(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|id| self.player_states.get(*id).is_some_and(|p| p.is_alive))
            .cloned()
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.player_states.values().filter(|p| p.is_alive).count()
    }

    /// Record that a player attached to the session. Returns true when this
    /// was the last missing player and the match started.
    pub fn mark_present(&mut self, player_id: &PlayerId, now: DateTime<Utc>) -> GameResult<bool> {
        if !self.is_member(player_id) {
            return Err(GameError::NotFound(format!("player {player_id} in session")));
        }
        self.present.insert(player_id.clone());

        if self.status == SessionStatus::Waiting && self.present.len() == self.players.len() {
            self.start(now);
            return Ok(true);
        }
        Ok(false)
    }

    /// waiting -> active; ignored in any other state
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::Waiting {
            return false;
        }
        self.status = SessionStatus::Active;
        self.started_at = Some(now);
        true
    }

    /// Merge telemetry into a player's state
    pub fn update_player(
        &mut self,
        player_id: &PlayerId,
        update: PlayerUpdate,
        now: DateTime<Utc>,
    ) -> GameResult<Option<Movement>> {
        update.validate()?;
        let frozen = self.status == SessionStatus::Finished;
        let player = self.player_mut(player_id)?;
        if frozen {
            return Err(GameError::Validation("session has finished".into()));
        }

        let movement = update.position.map(|to| Movement {
            from: player.position,
            to,
            elapsed: now - player.last_update,
        });

        if let Some(position) = update.position {
            player.position = position;
        }
        if let Some(health) = update.health {
            player.health = health;
        }
        if let Some(shield) = update.shield {
            player.shield = shield;
        }
        if let Some(weapons) = update.weapons {
            player.weapons = weapons;
        }
        player.last_update = now;

        Ok(movement)
    }

    /// Track a shot for rate checks, trimming entries outside `window`
    pub fn record_shot(
        &mut self,
        player_id: &PlayerId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> GameResult<Vec<DateTime<Utc>>> {
        self.ensure_active()?;
        let shooter = self.player_mut(player_id)?;
        if !shooter.is_alive {
            return Err(GameError::Validation("eliminated players cannot shoot".into()));
        }

        shooter.recent_shots.push_back(now);
        while shooter
            .recent_shots
            .front()
            .is_some_and(|t| now - *t > window)
        {
            shooter.recent_shots.pop_front();
        }
        Ok(shooter.recent_shots.iter().copied().collect())
    }

    /// Track a reported hit. Distance is measured from authoritative
    /// positions. Returns the shooter/target positions and the hit history.
    pub fn record_hit(
        &mut self,
        shooter_id: &PlayerId,
        target_id: &PlayerId,
        headshot: bool,
    ) -> GameResult<(Vec3, Vec3, Vec<HitSample>)> {
        let target_position = self
            .player(target_id)
            .map(|t| t.position)
            .ok_or_else(|| GameError::NotFound(format!("player {target_id} in session")))?;

        let shooter = self.player_mut(shooter_id)?;
        let shooter_position = shooter.position;
        shooter.recent_hits.push_back(HitSample {
            headshot,
            distance: shooter_position.distance(&target_position),
        });
        if shooter.recent_hits.len() > HIT_HISTORY {
            shooter.recent_hits.pop_front();
        }

        Ok((
            shooter_position,
            target_position,
            shooter.recent_hits.iter().copied().collect(),
        ))
    }

    /// Mark `victim_id` eliminated, crediting `killer_id` if it is a live
    /// member. Returns results when this elimination ended the match.
    pub fn eliminate(
        &mut self,
        victim_id: &PlayerId,
        killer_id: Option<&PlayerId>,
        now: DateTime<Utc>,
    ) -> GameResult<Option<MatchResults>> {
        self.ensure_active()?;

        let order = self.eliminations + 1;
        let victim = self.player_mut(victim_id)?;
        if !victim.is_alive {
            return Ok(None);
        }
        victim.is_alive = false;
        victim.eliminated_at = Some(now);
        victim.elimination_order = Some(order);
        self.eliminations = order;

        if let Some(killer_id) = killer_id.filter(|k| *k != victim_id) {
            if let Some(killer) = self.player_states.get_mut(killer_id) {
                if killer.is_alive {
                    killer.kills += 1;
                }
            }
        }

        if self.alive_count() <= 1 {
            return Ok(self.finish(now));
        }
        Ok(None)
    }

    /// Advance the zone by one, up to `max_zones`; reaching the last zone
    /// finishes the match. No-op once finished.
    pub fn progress_zone(&mut self, now: DateTime<Utc>) -> ZoneProgress {
        if self.status == SessionStatus::Finished {
            return ZoneProgress {
                current_zone: self.current_zone,
                max_zones: self.max_zones,
                results: None,
            };
        }

        if self.current_zone < self.max_zones {
            self.current_zone += 1;
        }
        let results = if self.current_zone >= self.max_zones {
            self.finish(now)
        } else {
            None
        };

        ZoneProgress {
            current_zone: self.current_zone,
            max_zones: self.max_zones,
            results,
        }
    }

    /// Enter `finished`. Only the first caller gets the results.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<MatchResults> {
        if self.status == SessionStatus::Finished {
            return None;
        }
        self.status = SessionStatus::Finished;
        self.ended_at = Some(now);
        Some(self.finalize())
    }

    /// Winner and per-player placement.
    ///
    /// Survivors place 1. An eliminated player places one behind every
    /// player eliminated at or after it, so the last to fall is 2nd.
    pub fn finalize(&self) -> MatchResults {
        let alive = self.alive_players();
        let winner = match alive.as_slice() {
            [sole] => Some(sole.clone()),
            _ => None,
        };

        let orders: Vec<u32> = self
            .player_states
            .values()
            .filter_map(|p| p.elimination_order)
            .collect();

        let player_results = self
            .player_states
            .iter()
            .map(|(id, state)| {
                let placement = match state.elimination_order {
                    None => 1,
                    Some(order) => orders.iter().filter(|o| **o >= order).count() as u32 + 1,
                };
                let result = PlayerResult {
                    won: winner.as_ref() == Some(id),
                    kills: state.kills,
                    died: !state.is_alive,
                    placement,
                };
                (id.clone(), result)
            })
            .collect();

        let duration_secs = match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).num_seconds(),
            _ => 0,
        };

        MatchResults {
            session_id: self.session_id,
            winner,
            duration_secs,
            player_results,
        }
    }

    fn ensure_active(&self) -> GameResult<()> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Waiting => Err(GameError::Validation("match has not started".into())),
            SessionStatus::Finished => Err(GameError::Validation("session has finished".into())),
        }
    }
}

/// Evenly spaced spawn points on a ring, rotated by a seeded offset
fn spawn_ring(seed: u64, count: usize) -> Vec<Vec3> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let offset = rng.gen_range(0.0..std::f64::consts::TAU);
    let step = std::f64::consts::TAU / count.max(1) as f64;
    (0..count)
        .map(|i| {
            let angle = offset + step * i as f64;
            Vec3::new(
                angle.cos() * SPAWN_RING_RADIUS,
                angle.sin() * SPAWN_RING_RADIUS,
                0.0,
            )
        })
        .collect()
}
