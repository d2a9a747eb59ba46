//! Bounded, TTL'd suspicion ledger with escalation to review flags

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::AntiCheatConfig;
use crate::util::time::chrono_duration;
use crate::ws::protocol::PlayerId;

use super::detectors::{Detection, DetectionKind, Severity};

/// One detection event for a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspicionRecord {
    pub player_id: PlayerId,
    #[serde(rename = "type")]
    pub kind: DetectionKind,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub severity: Severity,
}

impl SuspicionRecord {
    pub fn from_detection(player_id: PlayerId, detection: &Detection, at: DateTime<Utc>) -> Self {
        Self {
            player_id,
            kind: detection.kind,
            timestamp: at,
            details: detection.details.clone(),
            severity: detection.severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    PendingReview,
}

/// Escalated review marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    pub player_id: PlayerId,
    pub flagged_at: DateTime<Utc>,
    pub reason: String,
    pub activities: Vec<SuspicionRecord>,
    pub status: FlagStatus,
}

/// Retention and escalation limits, in chrono units
#[derive(Debug, Clone, Copy)]
pub struct LedgerPolicy {
    pub capacity: usize,
    pub record_ttl: Duration,
    pub flag_ttl: Duration,
    pub escalation_threshold: usize,
    pub escalation_window: Duration,
    pub flag_history: usize,
}

impl From<&AntiCheatConfig> for LedgerPolicy {
    fn from(config: &AntiCheatConfig) -> Self {
        Self {
            capacity: config.ledger_capacity,
            record_ttl: chrono_duration(config.record_ttl),
            flag_ttl: chrono_duration(config.flag_ttl),
            escalation_threshold: config.escalation_threshold,
            escalation_window: chrono_duration(config.escalation_window),
            flag_history: config.flag_history,
        }
    }
}

/// Not older than `ttl` at `now`
fn fresh(at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - at <= ttl
}

#[derive(Debug, Default)]
struct PlayerLedger {
    records: VecDeque<SuspicionRecord>,
    flag: Option<FlagRecord>,
}

impl PlayerLedger {
    fn prune(&mut self, policy: &LedgerPolicy, now: DateTime<Utc>) {
        self.records
            .retain(|r| fresh(r.timestamp, now, policy.record_ttl));
        while self.records.len() > policy.capacity {
            self.records.pop_front();
        }
        if self
            .flag
            .as_ref()
            .is_some_and(|f| !fresh(f.flagged_at, now, policy.flag_ttl))
        {
            self.flag = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty() && self.flag.is_none()
    }
}

/// Result of appending a record
#[derive(Debug, Clone)]
pub struct Appended {
    /// Live records for the player after the append
    pub total: usize,
    /// Set only when this append created a new flag
    pub new_flag: Option<FlagRecord>,
}

/// Per-player ledgers. Appends for one player are serialized through the
/// map entry; distinct players proceed independently.
pub struct SuspicionLedger {
    players: DashMap<PlayerId, PlayerLedger>,
    policy: LedgerPolicy,
}

impl SuspicionLedger {
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            players: DashMap::new(),
            policy,
        }
    }

    /// Append, trim, and escalate if the trailing window holds enough
    /// records and no flag is already pending.
    pub fn append(&self, record: SuspicionRecord, now: DateTime<Utc>) -> Appended {
        let policy = self.policy;
        let mut ledger = self.players.entry(record.player_id.clone()).or_default();
        let player_id = record.player_id.clone();

        ledger.records.push_back(record);
        ledger.prune(&policy, now);

        let recent = ledger
            .records
            .iter()
            .filter(|r| fresh(r.timestamp, now, policy.escalation_window))
            .count();

        let new_flag = if recent >= policy.escalation_threshold && ledger.flag.is_none() {
            let skip = ledger.records.len().saturating_sub(policy.flag_history);
            let flag = FlagRecord {
                player_id,
                flagged_at: now,
                reason: "Multiple suspicious activities".to_string(),
                activities: ledger.records.iter().skip(skip).cloned().collect(),
                status: FlagStatus::PendingReview,
            };
            ledger.flag = Some(flag.clone());
            Some(flag)
        } else {
            None
        };

        Appended {
            total: ledger.records.len(),
            new_flag,
        }
    }

    /// Live records for a player, oldest first
    pub fn records(&self, player_id: &PlayerId, now: DateTime<Utc>) -> Vec<SuspicionRecord> {
        let policy = self.policy;
        let records = match self.players.get_mut(player_id) {
            Some(mut ledger) => {
                ledger.prune(&policy, now);
                ledger.records.iter().cloned().collect()
            }
            None => return Vec::new(),
        };
        self.evict_if_empty(player_id);
        records
    }

    pub fn flag(&self, player_id: &PlayerId, now: DateTime<Utc>) -> Option<FlagRecord> {
        let policy = self.policy;
        let flag = {
            let mut ledger = self.players.get_mut(player_id)?;
            ledger.prune(&policy, now);
            ledger.flag.clone()
        };
        self.evict_if_empty(player_id);
        flag
    }

    /// All unexpired flags, oldest first
    pub fn flags(&self, now: DateTime<Utc>) -> Vec<FlagRecord> {
        self.sweep(now);

        let mut flags: Vec<FlagRecord> = self
            .players
            .iter()
            .filter_map(|ledger| ledger.flag.clone())
            .collect();
        flags.sort_by(|a, b| a.flagged_at.cmp(&b.flagged_at));
        flags
    }

    /// Prune every ledger and drop players with nothing left. Returns the
    /// number of players dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let policy = self.policy;
        let before = self.players.len();
        self.players.retain(|_, ledger| {
            ledger.prune(&policy, now);
            !ledger.is_empty()
        });
        before.saturating_sub(self.players.len())
    }

    /// Players with any live state
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn evict_if_empty(&self, player_id: &PlayerId) {
        self.players.remove_if(player_id, |_, ledger| ledger.is_empty());
    }

    /// Drop a player's records and flag. Returns true if anything was held.
    pub fn clear(&self, player_id: &PlayerId) -> bool {
        self.players
            .remove(player_id)
            .is_some_and(|(_, ledger)| !ledger.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> LedgerPolicy {
        LedgerPolicy::from(&AntiCheatConfig::default())
    }

    fn record(player: &str, at: DateTime<Utc>) -> SuspicionRecord {
        SuspicionRecord {
            player_id: player.into(),
            kind: DetectionKind::SpeedHack,
            timestamp: at,
            details: json!({}),
            severity: Severity::High,
        }
    }

    #[test]
    fn five_records_in_an_hour_flag_exactly_once() {
        let ledger = SuspicionLedger::new(policy());
        let now = Utc::now();

        let flags: Vec<_> = (0..8)
            .map(|i| {
                let at = now + Duration::minutes(i);
                ledger.append(record("p1", at), at).new_flag
            })
            .collect();

        assert!(flags[..4].iter().all(Option::is_none));
        let flag = flags[4].as_ref().expect("fifth record escalates");
        assert_eq!(flag.status, FlagStatus::PendingReview);
        assert_eq!(flag.activities.len(), 5);
        assert!(flags[5..].iter().all(Option::is_none));
        assert_eq!(ledger.flags(now + Duration::minutes(8)).len(), 1);
    }

    #[test]
    fn sparse_records_do_not_escalate() {
        let ledger = SuspicionLedger::new(policy());
        let start = Utc::now();

        for i in 0..6 {
            let at = start + Duration::minutes(20 * i);
            assert!(ledger.append(record("p1", at), at).new_flag.is_none());
        }
    }

    #[test]
    fn ledger_is_capped_and_flag_keeps_last_ten() {
        let ledger = SuspicionLedger::new(policy());
        let start = Utc::now();

        for i in 0..150 {
            let at = start + Duration::seconds(i);
            ledger.append(record("p1", at), at);
        }

        let now = start + Duration::seconds(150);
        let records = ledger.records(&"p1".into(), now);
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].timestamp, start + Duration::seconds(50));

        let flag = ledger.flag(&"p1".into(), now).unwrap();
        assert_eq!(flag.activities.len(), 5, "flag raised on the fifth record");
    }

    #[test]
    fn records_and_flags_expire() {
        let ledger = SuspicionLedger::new(policy());
        let start = Utc::now();
        for i in 0..5 {
            let at = start + Duration::seconds(i);
            ledger.append(record("p1", at), at);
        }
        assert!(ledger.flag(&"p1".into(), start + Duration::seconds(5)).is_some());

        let next_day = start + Duration::hours(25);
        assert!(ledger.records(&"p1".into(), next_day).is_empty());
        assert!(ledger.flag(&"p1".into(), next_day).is_some(), "flag outlives records");

        let next_week = start + Duration::days(8);
        assert!(ledger.flag(&"p1".into(), next_week).is_none());
        assert!(ledger.flags(next_week).is_empty());
    }

    #[test]
    fn expired_flag_allows_reflagging() {
        let ledger = SuspicionLedger::new(policy());
        let start = Utc::now();
        for i in 0..5 {
            let at = start + Duration::seconds(i);
            ledger.append(record("p1", at), at);
        }

        let later = start + Duration::days(8);
        let mut reflagged = None;
        for i in 0..5 {
            let at = later + Duration::seconds(i);
            reflagged = reflagged.or(ledger.append(record("p1", at), at).new_flag);
        }
        assert_eq!(reflagged.unwrap().flagged_at, later + Duration::seconds(4));
    }

    #[test]
    fn expired_players_are_evicted() {
        let ledger = SuspicionLedger::new(policy());
        let start = Utc::now();
        ledger.append(record("quiet", start), start);
        for i in 0..5 {
            let at = start + Duration::seconds(i);
            ledger.append(record("flagged", at), at);
        }
        assert_eq!(ledger.len(), 2);

        let next_day = start + Duration::hours(25);
        assert!(ledger.records(&"quiet".into(), next_day).is_empty());
        assert_eq!(ledger.len(), 1, "nothing left for quiet");

        // Records gone but the flag is still live
        assert_eq!(ledger.flags(next_day).len(), 1);
        assert_eq!(ledger.len(), 1);

        assert_eq!(ledger.sweep(start + Duration::days(8)), 1);
        assert!(ledger.is_empty());
        assert!(ledger.flags(start + Duration::days(8)).is_empty());
    }

    #[test]
    fn players_are_independent_and_clearable() {
        let ledger = SuspicionLedger::new(policy());
        let now = Utc::now();
        for _ in 0..5 {
            ledger.append(record("p1", now), now);
        }
        ledger.append(record("p2", now), now);

        assert!(ledger.flag(&"p2".into(), now).is_none());
        assert!(ledger.clear(&"p1".into()));
        assert!(!ledger.clear(&"p1".into()));
        assert!(ledger.flags(now).is_empty());
        assert_eq!(ledger.records(&"p2".into(), now).len(), 1);
    }
}
