//! Application state shared across routes and connections

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::anticheat::AntiCheatEngine;
use crate::config::Config;
use crate::matchmaking::MatchmakingService;
use crate::net::{BroadcastRouter, ConnectionRegistry};
use crate::session::{MatchConcluder, SessionManager, ZoneScheduler};
use crate::store::{Persistence, RosterProvider, StatsStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: BroadcastRouter,
    pub sessions: Arc<SessionManager>,
    pub matchmaking: Arc<MatchmakingService>,
    pub anticheat: Arc<AntiCheatEngine>,
    pub stats: StatsStore,
    pub concluder: MatchConcluder,
    pub persistence: Persistence,
}

impl AppState {
    pub fn new(config: Config, persistence: Persistence, roster: Arc<dyn RosterProvider>) -> Self {
        let config = Arc::new(config);

        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone(), roster);

        let sessions = Arc::new(SessionManager::new(
            persistence.clone(),
            config.game.max_zones,
            config.game.session_lock_timeout,
        ));
        let stats = StatsStore::new(persistence.clone());
        let concluder = MatchConcluder::new(sessions.clone(), router.clone(), stats.clone());

        let matchmaking = Arc::new(MatchmakingService::new(
            config.game.clone(),
            sessions.clone(),
            router.clone(),
            persistence.clone(),
        ));
        let anticheat = Arc::new(AntiCheatEngine::new(
            config.anticheat.clone(),
            persistence.clone(),
        ));

        Self {
            config,
            registry,
            router,
            sessions,
            matchmaking,
            anticheat,
            stats,
            concluder,
            persistence,
        }
    }

    /// Start the matchmaking loop and the zone clock. Both stop when
    /// `cancel` fires.
    pub fn spawn_background(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let zones = ZoneScheduler::new(
            self.sessions.clone(),
            self.concluder.clone(),
            self.router.clone(),
            self.config.game.zone_interval,
        );

        vec![
            tokio::spawn(self.matchmaking.clone().run(cancel.clone())),
            tokio::spawn(self.anticheat.clone().run(cancel.clone())),
            tokio::spawn(zones.run(cancel)),
        ]
    }
}
