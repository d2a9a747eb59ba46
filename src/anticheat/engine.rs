//! Runs the detectors over session telemetry and records the verdicts

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AntiCheatConfig;
use crate::session::Movement;
use crate::ws::protocol::{PlayerId, Vec3};

use super::detectors::{
    check_aimbot, check_rapid_fire, check_speed, check_teleport, check_wall_hack, Detection,
    HitSample,
};
use super::ledger::{Appended, FlagRecord, LedgerPolicy, SuspicionLedger, SuspicionRecord};
use crate::store::Persistence;

/// Telemetry for a shot that reported a hit
#[derive(Debug, Clone)]
pub struct HitTelemetry {
    pub shooter: Vec3,
    pub target: Vec3,
    pub line_of_sight: bool,
    pub recent_hits: Vec<HitSample>,
}

pub struct AntiCheatEngine {
    config: AntiCheatConfig,
    ledger: SuspicionLedger,
    persistence: Persistence,
}

impl AntiCheatEngine {
    pub fn new(config: AntiCheatConfig, persistence: Persistence) -> Self {
        let ledger = SuspicionLedger::new(LedgerPolicy::from(&config));
        Self {
            config,
            ledger,
            persistence,
        }
    }

    pub fn config(&self) -> &AntiCheatConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SuspicionLedger {
        &self.ledger
    }

    /// Speed and teleport checks for one position update
    pub fn evaluate_movement(
        &self,
        player_id: &PlayerId,
        movement: &Movement,
        now: DateTime<Utc>,
    ) -> Vec<Detection> {
        let detections: Vec<Detection> = [
            check_speed(&self.config, &movement.from, &movement.to, movement.elapsed),
            check_teleport(&self.config, &movement.from, &movement.to),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.record_all(player_id, &detections, now);
        detections
    }

    /// Rapid-fire check on every shot; wall-hack and aim-bot checks when
    /// the shot reported a hit
    pub fn evaluate_shot(
        &self,
        player_id: &PlayerId,
        shots: &[DateTime<Utc>],
        hit: Option<&HitTelemetry>,
        now: DateTime<Utc>,
    ) -> Vec<Detection> {
        let mut detections: Vec<Detection> =
            check_rapid_fire(&self.config, shots, now).into_iter().collect();

        if let Some(hit) = hit {
            detections.extend(check_wall_hack(
                &self.config,
                &hit.shooter,
                &hit.target,
                hit.line_of_sight,
            ));
            detections.extend(check_aimbot(&self.config, &hit.recent_hits));
        }

        self.record_all(player_id, &detections, now);
        detections
    }

    fn record_all(&self, player_id: &PlayerId, detections: &[Detection], now: DateTime<Utc>) {
        for detection in detections {
            self.report(player_id, detection, now);
        }
    }

    /// Append a detection to the player's ledger and mirror it to the store
    pub fn report(&self, player_id: &PlayerId, detection: &Detection, now: DateTime<Utc>) -> Appended {
        warn!(
            player_id = %player_id,
            kind = ?detection.kind,
            severity = ?detection.severity,
            details = %detection.details,
            "Anti-cheat detection"
        );

        let record = SuspicionRecord::from_detection(player_id.clone(), detection, now);
        let ttl = Some(self.config.record_ttl);
        self.persistence.set_json(
            format!("anticheat:{}:{}", player_id, now.timestamp_millis()),
            &record,
            ttl,
        );

        let appended = self.ledger.append(record, now);
        self.persistence.set_json(
            format!("anticheat:player:{}", player_id),
            &self.ledger.records(player_id, now),
            ttl,
        );

        if let Some(flag) = &appended.new_flag {
            self.persist_flag(flag);
            warn!(
                player_id = %player_id,
                activities = flag.activities.len(),
                "Player flagged for review"
            );
        }
        appended
    }

    fn persist_flag(&self, flag: &FlagRecord) {
        self.persistence.set_json(
            format!("anticheat:flagged:{}", flag.player_id),
            flag,
            Some(self.config.flag_ttl),
        );
    }

    pub fn records(&self, player_id: &PlayerId, now: DateTime<Utc>) -> Vec<SuspicionRecord> {
        self.ledger.records(player_id, now)
    }

    pub fn flags(&self, now: DateTime<Utc>) -> Vec<FlagRecord> {
        self.ledger.flags(now)
    }

    /// Periodically drop expired ledgers until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let dropped = self.ledger.sweep(Utc::now());
                    if dropped > 0 {
                        debug!(dropped, "Swept expired suspicion ledgers");
                    }
                }
            }
        }
        info!("Anti-cheat sweep stopped");
    }

    /// Forget everything held about a player, in memory and in the store
    pub async fn clear(&self, player_id: &PlayerId) -> bool {
        let cleared = self.ledger.clear(player_id);
        self.persistence.del(format!("anticheat:flagged:{}", player_id));
        self.persistence.del(format!("anticheat:player:{}", player_id));

        if let Some(store) = self.persistence.store() {
            match store.keys(&format!("anticheat:{}:*", player_id)).await {
                Ok(keys) => keys.into_iter().for_each(|key| self.persistence.del(key)),
                Err(e) => warn!(player_id = %player_id, error = %e, "Could not list activity keys"),
            }
        }

        info!(player_id = %player_id, cleared, "Cleared anti-cheat records");
        cleared
    }
}
