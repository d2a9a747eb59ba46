//! Global zone clock

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::net::BroadcastRouter;
use crate::ws::protocol::ServerMsg;

use super::conclude::MatchConcluder;
use super::manager::SessionManager;
use super::state::SessionStatus;

/// Advances the zone of every active session on a fixed interval
pub struct ZoneScheduler {
    sessions: Arc<SessionManager>,
    concluder: MatchConcluder,
    router: BroadcastRouter,
    interval: Duration,
}

impl ZoneScheduler {
    pub fn new(
        sessions: Arc<SessionManager>,
        concluder: MatchConcluder,
        router: BroadcastRouter,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            concluder,
            router,
            interval,
        }
    }

    /// One pass over the active sessions. Returns how many advanced.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut advanced = 0;

        for session_id in self.sessions.ids() {
            let step = self.sessions.with_session(session_id, |session| {
                Ok((session.status == SessionStatus::Active).then(|| session.progress_zone(now)))
            });

            let progress = match step {
                Ok(Some(progress)) => progress,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Zone step skipped");
                    continue;
                }
            };
            advanced += 1;

            self.router.session_broadcast(
                session_id,
                &ServerMsg::ZoneUpdate {
                    current_zone: progress.current_zone,
                    max_zones: progress.max_zones,
                },
                None,
            );
            debug!(session_id = %session_id, zone = progress.current_zone, "Zone advanced");

            if let Some(results) = progress.results {
                self.concluder.conclude(&results).await;
            }
        }
        advanced
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Zone scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
        info!("Zone scheduler stopped");
    }
}
