//! Match sessions: state machine, registry, zone clock and match end

pub mod conclude;
pub mod manager;
pub mod state;
pub mod zone;

pub use conclude::MatchConcluder;
pub use manager::{SessionManager, SESSION_TTL};
pub use state::{
    GameSession, LeaderboardEntry, MatchResults, Movement, PlayerResult, PlayerState,
    PlayerUpdate, SessionStatus, ZoneProgress,
};
pub use zone::ZoneScheduler;
