//! The single match-end path shared by eliminations and the zone clock

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::net::BroadcastRouter;
use crate::store::StatsStore;
use crate::ws::protocol::ServerMsg;

use super::manager::SessionManager;
use super::state::MatchResults;

/// Broadcasts results, feeds stats and retires the session. Callers only
/// reach this with results returned by `GameSession::finish`, which yields
/// them exactly once per session.
#[derive(Clone)]
pub struct MatchConcluder {
    sessions: Arc<SessionManager>,
    router: BroadcastRouter,
    stats: StatsStore,
}

impl MatchConcluder {
    pub fn new(sessions: Arc<SessionManager>, router: BroadcastRouter, stats: StatsStore) -> Self {
        Self {
            sessions,
            router,
            stats,
        }
    }

    pub async fn conclude(&self, results: &MatchResults) {
        let session_id = results.session_id;
        let reached = self.router.session_broadcast(
            session_id,
            &ServerMsg::MatchEnded {
                results: results.clone(),
                leaderboard: results.leaderboard(),
            },
            None,
        );

        let now = Utc::now();
        for (player_id, result) in &results.player_results {
            self.stats.record(player_id, result, now).await;
            self.router.registry().clear_session(player_id, session_id);
        }
        self.sessions.remove(&session_id);

        info!(
            session_id = %session_id,
            winner = ?results.winner.as_ref().map(|w| w.as_str()),
            duration_secs = results.duration_secs,
            notified = reached,
            "Match ended"
        );
    }
}
