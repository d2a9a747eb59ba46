//! Matchmaking service - manages queue and match creation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::net::BroadcastRouter;
use crate::session::{GameSession, SessionManager};
use crate::store::Persistence;
use crate::util::time::chrono_duration;
use crate::ws::protocol::{PlayerData, PlayerId, ServerMsg};

use super::queue::{MatchmakingQueue, PartitionCount, QueueEntry};

fn queue_key(player_id: &PlayerId) -> String {
    format!("queue:{}", player_id)
}

fn notification_key(player_id: &PlayerId) -> String {
    format!("notification:{}", player_id)
}

/// MATCH_READY that could not be delivered yet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// False when the player already had a live entry
    pub queued: bool,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total_players: usize,
    pub partitions: Vec<PartitionCount>,
    pub estimated_wait_secs: u64,
}

/// Matchmaking service
pub struct MatchmakingService {
    queue: Mutex<MatchmakingQueue>,
    sessions: Arc<SessionManager>,
    router: BroadcastRouter,
    persistence: Persistence,
    notifications: DashMap<PlayerId, PendingNotification>,
    config: GameConfig,
}

impl MatchmakingService {
    pub fn new(
        config: GameConfig,
        sessions: Arc<SessionManager>,
        router: BroadcastRouter,
        persistence: Persistence,
    ) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new(
                config.max_players_per_match,
                config.skill_baseline,
            )),
            sessions,
            router,
            persistence,
            notifications: DashMap::new(),
            config,
        }
    }

    /// Join matchmaking queue, then try to form a match right away when
    /// `form_on_join` is set
    pub async fn join_queue(
        &self,
        player_id: &PlayerId,
        data: &PlayerData,
        now: DateTime<Utc>,
    ) -> GameResult<JoinOutcome> {
        let entry = QueueEntry::new(player_id.clone(), data, now);
        let outcome = {
            // Checked under the queue lock: sessions are only created while
            // it is held, so the answer cannot go stale before the enqueue
            let mut queue = self.queue.lock().await;
            if self.sessions.session_of(player_id).is_some() {
                return Err(GameError::Validation("Already in a match".into()));
            }

            let queued = queue.enqueue(entry.clone());
            if queued {
                self.persistence
                    .set_json(queue_key(player_id), &entry, Some(self.config.queue_timeout));
                info!(
                    player_id = %player_id,
                    mode = %entry.mode,
                    region = %entry.region,
                    queue_size = queue.len(),
                    "Player joined matchmaking queue"
                );
            } else {
                debug!(player_id = %player_id, "Player already queued");
            }

            JoinOutcome {
                queued,
                queue_size: queue.len(),
            }
        };

        if outcome.queued && self.config.form_on_join {
            if let Err(e) = self.form_match(now).await {
                warn!(error = %e, "Match formation on join failed");
            }
        }
        Ok(outcome)
    }

    /// Leave matchmaking queue
    pub async fn leave_queue(&self, player_id: &PlayerId) -> bool {
        let removed = self.queue.lock().await.dequeue(player_id);
        if removed {
            self.persistence.del(queue_key(player_id));
            info!(player_id = %player_id, "Player left matchmaking queue");
        }
        removed
    }

    /// Form at most one match and notify its players.
    ///
    /// The chosen entries leave the queue and the session is created while
    /// the queue lock is held, so no player can land in two sessions.
    /// Entries for players already seated elsewhere are dropped and the
    /// partition is retried without them.
    pub async fn form_match(&self, now: DateTime<Utc>) -> GameResult<Option<GameSession>> {
        let mut queue = self.queue.lock().await;
        let (entries, session) = loop {
            let Some(entries) = queue.take_match() else {
                return Ok(None);
            };

            let players: Vec<PlayerId> = entries.iter().map(|e| e.player_id.clone()).collect();
            match self.sessions.create(players, rand::random(), now) {
                Ok(session) => break (entries, session),
                Err(e) => {
                    let (seated, waiting): (Vec<QueueEntry>, Vec<QueueEntry>) = entries
                        .into_iter()
                        .partition(|entry| self.sessions.session_of(&entry.player_id).is_some());
                    for entry in waiting {
                        queue.enqueue(entry);
                    }
                    if seated.is_empty() {
                        return Err(e);
                    }
                    for entry in &seated {
                        self.persistence.del(queue_key(&entry.player_id));
                        warn!(player_id = %entry.player_id, "Dropping queue entry for player already in a session");
                    }
                }
            }
        };
        drop(queue);

        for entry in &entries {
            self.persistence.del(queue_key(&entry.player_id));
            self.notify_match_ready(&entry.player_id, session.session_id, now);
        }

        info!(
            session_id = %session.session_id,
            mode = %entries[0].mode,
            region = %entries[0].region,
            player_count = entries.len(),
            "Formed match"
        );
        Ok(Some(session))
    }

    fn notify_match_ready(&self, player_id: &PlayerId, session_id: Uuid, now: DateTime<Utc>) {
        let delivered = self
            .router
            .direct_send(player_id, ServerMsg::MatchReady { session_id });
        if delivered {
            return;
        }

        let pending = PendingNotification {
            session_id,
            expires_at: now + chrono_duration(self.config.match_ready_ttl),
        };
        self.persistence.set_json(
            notification_key(player_id),
            &pending,
            Some(self.config.match_ready_ttl),
        );
        self.notifications.insert(player_id.clone(), pending);
        debug!(player_id = %player_id, session_id = %session_id, "Match ready notification deferred");
    }

    /// Pending MATCH_READY for a reconnecting player, consumed on read
    pub fn take_notification(&self, player_id: &PlayerId, now: DateTime<Utc>) -> Option<Uuid> {
        let (_, pending) = self.notifications.remove(player_id)?;
        self.persistence.del(notification_key(player_id));
        (pending.expires_at > now).then_some(pending.session_id)
    }

    /// Silently drop entries older than the queue timeout
    pub async fn expire(&self, now: DateTime<Utc>) -> usize {
        let timeout = chrono_duration(self.config.queue_timeout);
        let expired = self.queue.lock().await.expire(now, timeout);
        for entry in &expired {
            self.persistence.del(queue_key(&entry.player_id));
            debug!(player_id = %entry.player_id, "Queue entry expired");
        }
        self.notifications.retain(|_, n| n.expires_at > now);
        expired.len()
    }

    /// Form every match the queue allows, then expire stale entries and
    /// sessions that never filled
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut formed = 0;
        loop {
            match self.form_match(now).await {
                Ok(Some(_)) => formed += 1,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Match formation failed");
                    break;
                }
            }
        }
        self.expire(now).await;
        self.expire_unstarted(now);
        formed
    }

    /// Cancel sessions whose players did not all join within the match
    /// ready window, releasing everyone back to matchmaking
    pub fn expire_unstarted(&self, now: DateTime<Utc>) -> usize {
        let max_wait = chrono_duration(self.config.match_ready_ttl);
        let expired = self.sessions.expire_waiting(now, max_wait);

        for (session_id, players) in &expired {
            self.router.session_broadcast(
                *session_id,
                &ServerMsg::error("Match cancelled: not every player joined in time"),
                None,
            );
            for player_id in players {
                self.router.registry().clear_session(player_id, *session_id);
                if self
                    .notifications
                    .remove_if(player_id, |_, n| n.session_id == *session_id)
                    .is_some()
                {
                    self.persistence.del(notification_key(player_id));
                }
            }
        }
        expired.len()
    }

    /// Reload queue entries mirrored by a previous process
    pub async fn restore(&self, now: DateTime<Utc>) -> usize {
        let Some(store) = self.persistence.store() else {
            return 0;
        };

        let keys = match store.keys("queue:*").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Queue restore skipped, store unavailable");
                return 0;
            }
        };

        let timeout = chrono_duration(self.config.queue_timeout);
        let mut restored = 0;
        let mut queue = self.queue.lock().await;
        for key in keys {
            let raw = match store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read queue entry");
                    continue;
                }
            };
            match serde_json::from_str::<QueueEntry>(&raw) {
                Ok(entry) if now - entry.joined_at <= timeout => {
                    if queue.enqueue(entry) {
                        restored += 1;
                    }
                }
                Ok(_) => debug!(key = %key, "Skipping expired queue entry"),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed queue entry"),
            }
        }

        info!(restored, "Restored matchmaking queue");
        restored
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.matchmaking_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
        info!("Matchmaking loop stopped");
    }

    pub async fn status(&self) -> QueueStatus {
        let queue = self.queue.lock().await;
        QueueStatus {
            total_players: queue.len(),
            partitions: queue.partition_counts(),
            estimated_wait_secs: queue.estimated_wait_secs(),
        }
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Check if player is in queue
    pub async fn is_queued(&self, player_id: &PlayerId) -> bool {
        self.queue.lock().await.contains(player_id)
    }
}
