//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anticheat::Severity;
use crate::session::{GameSession, LeaderboardEntry, MatchResults};
use crate::store::stats::PlayerStats;

/// Validated player identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// World-space position or direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Matchmaking attributes supplied with `JOIN_MATCHMAKING`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerData {
    pub skill: Option<i32>,
    pub region: Option<String>,
    #[serde(alias = "mode")]
    pub game_mode: Option<String>,
}

/// Optional hit report attached to a shot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotHit {
    pub target_id: PlayerId,
    #[serde(default)]
    pub headshot: bool,
    #[serde(default = "default_line_of_sight")]
    pub line_of_sight: bool,
}

fn default_line_of_sight() -> bool {
    true
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMsg {
    /// Bind this connection to the validated player identity
    #[serde(rename_all = "camelCase")]
    PlayerConnect { player_id: PlayerId },

    /// Enter the matchmaking queue
    #[serde(rename_all = "camelCase")]
    JoinMatchmaking {
        #[serde(default)]
        player_data: PlayerData,
    },

    /// Leave the matchmaking queue
    LeaveMatchmaking {},

    /// Attach to the session matchmaking placed us in
    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: Uuid },

    /// Movement / loadout telemetry
    PlayerUpdate {
        position: Option<Vec3>,
        health: Option<f64>,
        shield: Option<f64>,
        weapons: Option<Vec<String>>,
    },

    /// Weapon fired
    PlayerShoot {
        weapon: String,
        direction: Vec3,
        #[serde(default)]
        hit: Option<ShotHit>,
    },

    /// Sender reports eliminating `victim_id`
    #[serde(rename_all = "camelCase")]
    PlayerKill { victim_id: PlayerId },

    /// Request aggregate stats
    GetStats {},

    /// Keepalive
    Heartbeat {},
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    Connected {
        timestamp: DateTime<Utc>,
    },

    /// `queued` is false when the player already had a live entry
    #[serde(rename_all = "camelCase")]
    MatchmakingJoined {
        queued: bool,
        queue_size: usize,
    },

    MatchmakingLeft {
        removed: bool,
    },

    #[serde(rename_all = "camelCase")]
    MatchReady {
        session_id: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    SessionJoined {
        game_state: GameSession,
    },

    MatchStarted {
        players: Vec<PlayerId>,
    },

    #[serde(rename_all = "camelCase")]
    PlayerStateUpdate {
        player_id: PlayerId,
        position: Vec3,
        health: f64,
        shield: f64,
    },

    #[serde(rename_all = "camelCase")]
    PlayerShot {
        player_id: PlayerId,
        weapon: String,
        direction: Vec3,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    AnticheatAlert {
        player_id: PlayerId,
        reason: String,
        severity: Severity,
    },

    #[serde(rename_all = "camelCase")]
    PlayerEliminated {
        victim_id: PlayerId,
        killer_id: Option<PlayerId>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    ZoneUpdate {
        current_zone: u32,
        max_zones: u32,
    },

    MatchEnded {
        results: MatchResults,
        leaderboard: Vec<LeaderboardEntry>,
    },

    PlayerStats {
        stats: PlayerStats,
    },

    #[serde(rename_all = "camelCase")]
    FriendStatus {
        player_id: PlayerId,
        online: bool,
    },

    #[serde(rename_all = "camelCase")]
    PartyUpdate {
        player_id: PlayerId,
        status: String,
    },

    HeartbeatAck {},

    Error {
        message: String,
    },
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMsg::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_screaming_case_client_messages() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"PLAYER_CONNECT","playerId":"p1"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::PlayerConnect { player_id } if player_id.as_str() == "p1"));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"LEAVE_MATCHMAKING"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::LeaveMatchmaking {}));

        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"JOIN_MATCHMAKING","playerData":{"skill":1200,"mode":"duo"}}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::JoinMatchmaking { player_data } => {
                assert_eq!(player_data.skill, Some(1200));
                assert_eq!(player_data.game_mode.as_deref(), Some("duo"));
                assert_eq!(player_data.region, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn partial_player_update_leaves_missing_fields_empty() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"PLAYER_UPDATE","position":{"x":1.0,"y":2.0,"z":3.0}}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::PlayerUpdate {
                position,
                health,
                shield,
                weapons,
            } => {
                assert_eq!(position, Some(Vec3::new(1.0, 2.0, 3.0)));
                assert!(health.is_none() && shield.is_none() && weapons.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shot_hit_defaults_to_line_of_sight() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"PLAYER_SHOOT","weapon":"ar","direction":{"x":0,"y":1,"z":0},"hit":{"targetId":"p2"}}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::PlayerShoot { hit: Some(hit), .. } => {
                assert!(hit.line_of_sight);
                assert!(!hit.headshot);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_type_and_missing_fields() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"FLY"}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"PLAYER_KILL"}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>("not json").is_err());
    }

    #[test]
    fn server_messages_use_wire_names() {
        let json = serde_json::to_value(ServerMsg::ZoneUpdate {
            current_zone: 3,
            max_zones: 12,
        })
        .unwrap();
        assert_eq!(json["type"], "ZONE_UPDATE");
        assert_eq!(json["currentZone"], 3);
        assert_eq!(json["maxZones"], 12);

        let json = serde_json::to_value(ServerMsg::AnticheatAlert {
            player_id: "p1".into(),
            reason: "speed".into(),
            severity: Severity::High,
        })
        .unwrap();
        assert_eq!(json["type"], "ANTICHEAT_ALERT");
        assert_eq!(json["severity"], "HIGH");
    }

    #[test]
    fn vec3_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
        assert!(!Vec3::new(f64::NAN, 0.0, 0.0).is_finite());
    }
}
