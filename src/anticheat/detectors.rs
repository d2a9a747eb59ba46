//! Stateless telemetry evaluators
//!
//! Each check returns `Some(Detection)` when the delta looks suspicious.
//! They never block the gameplay message that produced the telemetry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AntiCheatConfig;
use crate::util::time::{chrono_duration, within_window};
use crate::ws::protocol::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionKind {
    SpeedHack,
    TeleportHack,
    RapidFire,
    PossibleWallhack,
    PossibleAimbot,
}

/// A suspicious verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub kind: DetectionKind,
    pub reason: String,
    pub severity: Severity,
    pub details: serde_json::Value,
}

/// One confirmed hit used for accuracy analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitSample {
    pub headshot: bool,
    pub distance: f64,
}

/// Movement faster than `max_speed` units/sec
pub fn check_speed(
    config: &AntiCheatConfig,
    from: &Vec3,
    to: &Vec3,
    elapsed: Duration,
) -> Option<Detection> {
    let millis = elapsed.num_milliseconds();
    if millis <= 0 {
        return None;
    }

    let distance = from.distance(to);
    let speed = distance / (millis as f64 / 1000.0);
    if speed <= config.max_speed {
        return None;
    }

    Some(Detection {
        kind: DetectionKind::SpeedHack,
        reason: format!(
            "Excessive speed detected: {:.2} units/sec (threshold: {})",
            speed, config.max_speed
        ),
        severity: Severity::High,
        details: json!({
            "speed": speed,
            "threshold": config.max_speed,
            "distance": distance,
            "deltaTimeMs": millis,
            "oldPosition": from,
            "newPosition": to,
        }),
    })
}

/// A single jump longer than `teleport_distance`, regardless of elapsed time
pub fn check_teleport(config: &AntiCheatConfig, from: &Vec3, to: &Vec3) -> Option<Detection> {
    let distance = from.distance(to);
    if distance <= config.teleport_distance {
        return None;
    }

    Some(Detection {
        kind: DetectionKind::TeleportHack,
        reason: format!(
            "Teleportation detected: {:.2} units (threshold: {})",
            distance, config.teleport_distance
        ),
        severity: Severity::Critical,
        details: json!({
            "distance": distance,
            "threshold": config.teleport_distance,
            "oldPosition": from,
            "newPosition": to,
        }),
    })
}

/// More than `rapid_fire_max_shots` inside the trailing window
pub fn check_rapid_fire(
    config: &AntiCheatConfig,
    shots: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Option<Detection> {
    if shots.len() < 2 {
        return None;
    }

    let window = chrono_duration(config.rapid_fire_window);
    let recent = shots
        .iter()
        .filter(|t| within_window(**t, now, window))
        .count();
    if recent <= config.rapid_fire_max_shots {
        return None;
    }

    Some(Detection {
        kind: DetectionKind::RapidFire,
        reason: format!(
            "Rapid fire detected: {} shots/sec (threshold: {})",
            recent, config.rapid_fire_max_shots
        ),
        severity: Severity::High,
        details: json!({
            "shotsInWindow": recent,
            "threshold": config.rapid_fire_max_shots,
            "windowMs": config.rapid_fire_window.as_millis() as u64,
        }),
    })
}

/// Hit without line of sight beyond `wall_hack_distance`.
///
/// Line of sight is client-reported; map occlusion is not modelled.
pub fn check_wall_hack(
    config: &AntiCheatConfig,
    shooter: &Vec3,
    target: &Vec3,
    line_of_sight: bool,
) -> Option<Detection> {
    if line_of_sight {
        return None;
    }

    let distance = shooter.distance(target);
    if distance <= config.wall_hack_distance {
        return None;
    }

    Some(Detection {
        kind: DetectionKind::PossibleWallhack,
        reason: format!(
            "Possible wall hack: shooting through obstacles at {:.2} units",
            distance
        ),
        severity: Severity::Medium,
        details: json!({
            "playerPosition": shooter,
            "targetPosition": target,
            "distance": distance,
            "hasLineOfSight": false,
        }),
    })
}

/// Headshot ratio above `aimbot_headshot_ratio` at long average range
pub fn check_aimbot(config: &AntiCheatConfig, hits: &[HitSample]) -> Option<Detection> {
    if hits.len() < config.aimbot_min_hits {
        return None;
    }

    let total = hits.len() as f64;
    let headshot_ratio = hits.iter().filter(|h| h.headshot).count() as f64 / total;
    let average_distance = hits.iter().map(|h| h.distance).sum::<f64>() / total;

    if headshot_ratio <= config.aimbot_headshot_ratio || average_distance <= config.aimbot_distance {
        return None;
    }

    Some(Detection {
        kind: DetectionKind::PossibleAimbot,
        reason: format!(
            "Possible aimbot: {:.1}% headshot rate at {:.1} units",
            headshot_ratio * 100.0,
            average_distance
        ),
        severity: Severity::High,
        details: json!({
            "headshotRate": headshot_ratio,
            "averageDistance": average_distance,
            "totalHits": hits.len(),
        }),
    })
}
