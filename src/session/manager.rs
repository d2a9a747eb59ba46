//! Live session registry with per-session mutual exclusion

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GameError, GameResult};
use crate::store::Persistence;
use crate::ws::protocol::PlayerId;

use super::state::{GameSession, SessionStatus};

/// Store TTL for `session:*` and `match:*` mirrors
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

/// One live session behind its own lock
pub struct SessionHandle {
    pub id: Uuid,
    state: Mutex<GameSession>,
}

/// Match metadata written once at creation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchRecord<'a> {
    session_id: Uuid,
    players: &'a [PlayerId],
    created_at: DateTime<Utc>,
}

/// All live sessions plus the player -> session index
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
    player_sessions: DashMap<PlayerId, Uuid>,
    persistence: Persistence,
    max_zones: u32,
    lock_timeout: Duration,
}

impl SessionManager {
    pub fn new(persistence: Persistence, max_zones: u32, lock_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            player_sessions: DashMap::new(),
            persistence,
            max_zones,
            lock_timeout,
        }
    }

    /// Create a waiting session for `players`.
    ///
    /// Fails if any player already belongs to a live session.
    pub fn create(
        &self,
        players: Vec<PlayerId>,
        seed: u64,
        now: DateTime<Utc>,
    ) -> GameResult<GameSession> {
        if players.len() < 2 {
            return Err(GameError::Validation("a session needs at least 2 players".into()));
        }
        if let Some(busy) = players.iter().find(|p| self.player_sessions.contains_key(*p)) {
            return Err(GameError::Validation(format!("player {busy} is already in a session")));
        }

        let id = Uuid::new_v4();
        let session = GameSession::new(id, players, self.max_zones, seed, now);

        for player_id in &session.players {
            self.player_sessions.insert(player_id.clone(), id);
        }
        self.sessions.insert(
            id,
            Arc::new(SessionHandle {
                id,
                state: Mutex::new(session.clone()),
            }),
        );

        self.persistence.set_json(
            format!("match:{id}"),
            &MatchRecord {
                session_id: id,
                players: &session.players,
                created_at: now,
            },
            Some(SESSION_TTL),
        );
        self.persist(&session);

        info!(
            session_id = %id,
            player_count = session.players.len(),
            "Created session"
        );
        Ok(session)
    }

    /// Run `f` with exclusive access to one session, then mirror the
    /// result to the store. A busy lock is retried once before giving up.
    pub fn with_session<T>(
        &self,
        session_id: Uuid,
        f: impl FnOnce(&mut GameSession) -> GameResult<T>,
    ) -> GameResult<T> {
        let handle = self.handle(session_id)?;
        let mut guard = self.lock(&handle)?;

        let output = f(&mut guard)?;
        self.persist(&guard);
        Ok(output)
    }

    /// Blocking acquire on the calling thread, bounded by two
    /// `lock_timeout` waits. Callers run on tokio workers, so the timeout
    /// stays in the tens of milliseconds.
    fn lock<'a>(&self, handle: &'a SessionHandle) -> GameResult<MutexGuard<'a, GameSession>> {
        if let Some(guard) = handle.state.try_lock_for(self.lock_timeout) {
            return Ok(guard);
        }
        debug!(session_id = %handle.id, "Session busy, retrying once");
        handle.state.try_lock_for(self.lock_timeout).ok_or_else(|| {
            warn!(session_id = %handle.id, "Session still busy, dropping operation");
            GameError::ConcurrencyConflict(format!("session {}", handle.id))
        })
    }

    /// Retire sessions still waiting for players `max_wait` after creation.
    /// Returns each retired session with its players, who are free to queue
    /// again.
    pub fn expire_waiting(
        &self,
        now: DateTime<Utc>,
        max_wait: chrono::Duration,
    ) -> Vec<(Uuid, Vec<PlayerId>)> {
        let mut expired = Vec::new();
        for session_id in self.ids() {
            let Ok(handle) = self.handle(session_id) else {
                continue;
            };
            let Ok(session) = self.lock(&handle) else {
                continue;
            };
            if session.status != SessionStatus::Waiting || now - session.created_at <= max_wait {
                continue;
            }

            let players = session.players.clone();
            // Removed under the session lock so a late JOIN_SESSION cannot
            // start it in between
            self.remove(&session_id);
            self.persistence.del(format!("session:{session_id}"));
            drop(session);

            info!(
                session_id = %session_id,
                player_count = players.len(),
                "Waiting session expired before every player joined"
            );
            expired.push((session_id, players));
        }
        expired
    }

    /// Point-in-time copy of a session
    pub fn snapshot(&self, session_id: Uuid) -> GameResult<GameSession> {
        self.with_session(session_id, |session| Ok(session.clone()))
    }

    fn handle(&self, session_id: Uuid) -> GameResult<Arc<SessionHandle>> {
        self.sessions
            .get(&session_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| GameError::NotFound(format!("session {session_id}")))
    }

    fn persist(&self, session: &GameSession) {
        self.persistence.set_json(
            format!("session:{}", session.session_id),
            session,
            Some(SESSION_TTL),
        );
    }

    /// The live session `player_id` belongs to
    pub fn session_of(&self, player_id: &PlayerId) -> Option<Uuid> {
        self.player_sessions.get(player_id).map(|s| *s)
    }

    pub fn contains(&self, session_id: &Uuid) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|s| *s.key()).collect()
    }

    /// Ids of sessions currently in `status`
    pub fn ids_with_status(&self, status: SessionStatus) -> Vec<Uuid> {
        self.ids()
            .into_iter()
            .filter(|id| match self.handle(*id) {
                Ok(handle) => self
                    .lock(&handle)
                    .map(|session| session.status == status)
                    .unwrap_or(false),
                Err(_) => false,
            })
            .collect()
    }

    /// Drop a session from the live registry. Its last snapshot stays in
    /// the store until the TTL runs out.
    pub fn remove(&self, session_id: &Uuid) -> Option<Arc<SessionHandle>> {
        let (_, handle) = self.sessions.remove(session_id)?;
        self.player_sessions.retain(|_, sid| *sid != *session_id);
        info!(session_id = %session_id, "Removed session");
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Players across all live sessions
    pub fn player_count(&self) -> usize {
        self.player_sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PlayerUpdate;
    use crate::store::{KvStore, MemoryKvStore};
    use crate::ws::protocol::Vec3;
    use tokio_util::sync::CancellationToken;

    fn manager() -> SessionManager {
        SessionManager::new(Persistence::disabled(), 12, Duration::from_millis(10))
    }

    fn ids(names: &[&str]) -> Vec<PlayerId> {
        names.iter().map(|n| PlayerId::from(*n)).collect()
    }

    #[test]
    fn create_indexes_players_and_rejects_double_booking() {
        let manager = manager();
        let session = manager.create(ids(&["a", "b"]), 1, Utc::now()).unwrap();

        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(manager.session_of(&"a".into()), Some(session.session_id));
        assert_eq!(manager.player_count(), 2);

        let err = manager.create(ids(&["b", "c"]), 1, Utc::now()).unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn create_needs_two_players() {
        assert!(manager().create(ids(&["solo"]), 1, Utc::now()).is_err());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let err = manager().snapshot(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[test]
    fn busy_session_conflicts_after_one_retry() {
        let manager = manager();
        let id = manager.create(ids(&["a", "b"]), 1, Utc::now()).unwrap().session_id;

        let handle = manager.handle(id).unwrap();
        let _held = handle.state.lock();

        let started = std::time::Instant::now();
        let err = manager.with_session(id, |_| Ok(())).unwrap_err();
        let waited = started.elapsed();
        assert!(matches!(err, GameError::ConcurrencyConflict(_)));
        assert!(waited >= Duration::from_millis(20), "two bounded waits");
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn mutations_are_visible_in_snapshots() {
        let manager = manager();
        let id = manager.create(ids(&["a", "b"]), 1, Utc::now()).unwrap().session_id;

        manager
            .with_session(id, |s| {
                s.update_player(
                    &"a".into(),
                    PlayerUpdate {
                        position: Some(Vec3::new(3.0, 4.0, 0.0)),
                        ..Default::default()
                    },
                    Utc::now(),
                )
            })
            .unwrap();

        let snapshot = manager.snapshot(id).unwrap();
        assert_eq!(snapshot.player(&"a".into()).unwrap().position, Vec3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn remove_frees_players_for_new_sessions() {
        let manager = manager();
        let id = manager.create(ids(&["a", "b"]), 1, Utc::now()).unwrap().session_id;

        assert!(manager.remove(&id).is_some());
        assert!(manager.session_of(&"a".into()).is_none());
        assert!(manager.create(ids(&["a", "b"]), 2, Utc::now()).is_ok());
    }

    #[test]
    fn filters_by_status() {
        let manager = manager();
        let now = Utc::now();
        let waiting = manager.create(ids(&["a", "b"]), 1, now).unwrap().session_id;
        let active = manager.create(ids(&["c", "d"]), 1, now).unwrap().session_id;
        manager.with_session(active, |s| Ok(s.start(now))).unwrap();

        assert_eq!(manager.ids_with_status(SessionStatus::Active), vec![active]);
        assert_eq!(manager.ids_with_status(SessionStatus::Waiting), vec![waiting]);
    }

    #[test]
    fn only_stale_waiting_sessions_expire() {
        let manager = manager();
        let now = Utc::now();
        let stale = manager.create(ids(&["a", "b"]), 1, now).unwrap().session_id;
        let started = manager.create(ids(&["c", "d"]), 1, now).unwrap().session_id;
        manager.with_session(started, |s| Ok(s.start(now))).unwrap();
        let fresh = manager
            .create(ids(&["e", "f"]), 1, now + chrono::Duration::seconds(50))
            .unwrap()
            .session_id;

        let expired = manager.expire_waiting(
            now + chrono::Duration::seconds(61),
            chrono::Duration::seconds(60),
        );
        assert_eq!(expired, vec![(stale, ids(&["a", "b"]))]);

        assert!(!manager.contains(&stale));
        assert!(manager.session_of(&"a".into()).is_none());
        assert!(manager.contains(&started));
        assert!(manager.contains(&fresh));
        assert_eq!(manager.player_count(), 4);
    }

    #[tokio::test]
    async fn sessions_and_match_metadata_are_mirrored() {
        let store = Arc::new(MemoryKvStore::new());
        let cancel = CancellationToken::new();
        let (persistence, writer) = Persistence::spawn(store.clone(), Default::default(), cancel.clone());
        let manager = SessionManager::new(persistence, 12, Duration::from_millis(10));

        let id = manager.create(ids(&["a", "b"]), 1, Utc::now()).unwrap().session_id;
        manager.with_session(id, |s| Ok(s.progress_zone(Utc::now()))).unwrap();

        cancel.cancel();
        writer.await.unwrap();

        let raw = store.get(&format!("session:{id}")).await.unwrap().unwrap();
        let mirrored: GameSession = serde_json::from_str(&raw).unwrap();
        assert_eq!(mirrored.current_zone, 2);
        assert!(store.get(&format!("match:{id}")).await.unwrap().is_some());
    }
}
