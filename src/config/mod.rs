//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
    /// Allowed client origins for CORS; empty allows any origin
    pub client_origins: Vec<String>,

    /// Backing key-value store for crash recovery
    pub store: StoreBackend,
    /// Social graph API (friends / parties), if configured
    pub social: Option<SocialApiConfig>,

    pub game: GameConfig,
    pub anticheat: AntiCheatConfig,
}

/// Which key-value store mirrors live state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process only; nothing survives a restart
    Memory,
    /// Redis-compatible REST endpoint
    Rest { url: String, token: String },
}

#[derive(Clone, Debug)]
pub struct SocialApiConfig {
    pub url: String,
    pub api_key: String,
}

/// Matchmaking and session tunables
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub max_players_per_match: usize,
    pub matchmaking_interval: Duration,
    pub queue_timeout: Duration,
    /// Skill rating the queue sorts distance from
    pub skill_baseline: i32,
    pub max_zones: u32,
    pub zone_interval: Duration,
    /// Also bounds how long a formed session waits for all its players
    pub match_ready_ttl: Duration,
    /// Try to form a match as soon as a player enqueues, not only on the
    /// matchmaking interval
    pub form_on_join: bool,
    /// Bounded wait for a session lock before the single retry. The wait
    /// parks a runtime worker, so a contended call stalls it for at most
    /// twice this.
    pub session_lock_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players_per_match: 10,
            matchmaking_interval: Duration::from_secs(5),
            queue_timeout: Duration::from_secs(300),
            skill_baseline: 1000,
            max_zones: 12,
            zone_interval: Duration::from_secs(60),
            match_ready_ttl: Duration::from_secs(60),
            form_on_join: true,
            session_lock_timeout: Duration::from_millis(50),
        }
    }
}

/// Anti-cheat thresholds. These are policy inputs, not invariants.
#[derive(Clone, Debug)]
pub struct AntiCheatConfig {
    /// Units per second
    pub max_speed: f64,
    /// Units moved in a single update
    pub teleport_distance: f64,
    pub rapid_fire_max_shots: usize,
    pub rapid_fire_window: Duration,
    pub wall_hack_distance: f64,
    pub aimbot_min_hits: usize,
    pub aimbot_headshot_ratio: f64,
    pub aimbot_distance: f64,
    /// Records inside `escalation_window` needed to flag a player
    pub escalation_threshold: usize,
    pub escalation_window: Duration,
    pub ledger_capacity: usize,
    pub record_ttl: Duration,
    pub flag_ttl: Duration,
    /// Records copied into a flag
    pub flag_history: usize,
    /// How often expired ledgers are dropped from memory
    pub sweep_interval: Duration,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            max_speed: 20.0,
            teleport_distance: 100.0,
            rapid_fire_max_shots: 100,
            rapid_fire_window: Duration::from_secs(1),
            wall_hack_distance: 50.0,
            aimbot_min_hits: 10,
            aimbot_headshot_ratio: 0.8,
            aimbot_distance: 100.0,
            escalation_threshold: 5,
            escalation_window: Duration::from_secs(60 * 60),
            ledger_capacity: 100,
            record_ttl: Duration::from_secs(24 * 60 * 60),
            flag_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            flag_history: 10,
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let store = match env::var("STORE_BACKEND").as_deref() {
            Err(_) | Ok("memory") => StoreBackend::Memory,
            Ok("rest") => StoreBackend::Rest {
                url: env::var("KV_REST_URL").map_err(|_| ConfigError::Missing("KV_REST_URL"))?,
                token: env::var("KV_REST_TOKEN")
                    .map_err(|_| ConfigError::Missing("KV_REST_TOKEN"))?,
            },
            Ok(_) => return Err(ConfigError::Invalid("STORE_BACKEND")),
        };

        let social = match (env::var("SOCIAL_API_URL"), env::var("SOCIAL_API_KEY")) {
            (Ok(url), Ok(api_key)) => Some(SocialApiConfig { url, api_key }),
            _ => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            client_origins: parse_origins(&env::var("CLIENT_ORIGIN").unwrap_or_default()),

            store,
            social,
            game: GameConfig::from_env()?,
            anticheat: AntiCheatConfig::from_env()?,
        })
    }
}

impl GameConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_players_per_match: env_or("MAX_PLAYERS_PER_MATCH", defaults.max_players_per_match)?,
            matchmaking_interval: env_secs_or(
                "MATCHMAKING_INTERVAL_SECS",
                defaults.matchmaking_interval,
            )?,
            queue_timeout: env_secs_or("QUEUE_TIMEOUT_SECS", defaults.queue_timeout)?,
            skill_baseline: env_or("SKILL_BASELINE", defaults.skill_baseline)?,
            max_zones: env_or("MAX_ZONES", defaults.max_zones)?,
            zone_interval: env_secs_or("ZONE_INTERVAL_SECS", defaults.zone_interval)?,
            match_ready_ttl: env_secs_or("MATCH_READY_TTL_SECS", defaults.match_ready_ttl)?,
            form_on_join: env_or("MATCH_ON_JOIN", defaults.form_on_join)?,
            session_lock_timeout: defaults.session_lock_timeout,
        })
    }
}

impl AntiCheatConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_speed: env_or("ANTICHEAT_MAX_SPEED", defaults.max_speed)?,
            teleport_distance: env_or("ANTICHEAT_TELEPORT_DISTANCE", defaults.teleport_distance)?,
            rapid_fire_max_shots: env_or("ANTICHEAT_RAPID_FIRE_SHOTS", defaults.rapid_fire_max_shots)?,
            wall_hack_distance: env_or("ANTICHEAT_WALL_HACK_DISTANCE", defaults.wall_hack_distance)?,
            ..defaults
        })
    }
}

/// Split a comma-separated origin list, dropping blanks
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn env_secs_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contended_session_lock_blocks_briefly() {
        let worst_case = GameConfig::default().session_lock_timeout * 2;
        assert!(worst_case <= Duration::from_millis(100));
    }

    #[test]
    fn game_defaults_match_documented_values() {
        let game = GameConfig::default();
        assert_eq!(game.max_players_per_match, 10);
        assert_eq!(game.queue_timeout, Duration::from_secs(300));
        assert_eq!(game.max_zones, 12);
        assert_eq!(game.zone_interval, Duration::from_secs(60));
        assert_eq!(game.match_ready_ttl, Duration::from_secs(60));
    }

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(parse_origins("").is_empty());
    }
}
