#![allow(dead_code)]

use std::sync::Arc;

use match_core::app::AppState;
use match_core::config::{AntiCheatConfig, Config, GameConfig, StoreBackend};
use match_core::store::{Persistence, StaticRoster};
use match_core::ws::dispatch::{self, ConnectionContext};
use match_core::ws::protocol::{PlayerId, ServerMsg};
use tokio::sync::mpsc;

pub const SECRET: &str = "integration-secret";

pub fn config() -> Config {
    Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "debug".into(),
        jwt_secret: SECRET.into(),
        client_origins: Vec::new(),
        store: StoreBackend::Memory,
        social: None,
        // Matches form on `tick` so tests can seat several players at once
        game: GameConfig {
            form_on_join: false,
            ..Default::default()
        },
        anticheat: AntiCheatConfig::default(),
    }
}

pub fn state_with(roster: StaticRoster, persistence: Persistence) -> AppState {
    AppState::new(config(), persistence, Arc::new(roster))
}

pub fn state_from(config: Config) -> AppState {
    AppState::new(config, Persistence::disabled(), Arc::new(StaticRoster::new()))
}

pub fn state() -> AppState {
    state_with(StaticRoster::new(), Persistence::disabled())
}

/// A fake transport: the dispatcher writes into `rx`
pub struct TestClient {
    pub ctx: ConnectionContext,
    pub rx: mpsc::Receiver<ServerMsg>,
}

impl TestClient {
    pub fn new(id: &str) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            ctx: ConnectionContext::new(PlayerId::from(id), tx),
            rx,
        }
    }

    /// Authenticated client that has completed PLAYER_CONNECT
    pub async fn connected(state: &AppState, id: &str) -> Self {
        let mut client = Self::new(id);
        client
            .send(state, &format!(r#"{{"type":"PLAYER_CONNECT","playerId":"{id}"}}"#))
            .await;
        client
    }

    pub async fn send(&mut self, state: &AppState, text: &str) {
        dispatch::handle_text(state, &mut self.ctx, text).await;
    }

    pub fn drain(&mut self) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    pub async fn disconnect(&self, state: &AppState) {
        dispatch::disconnect(state, &self.ctx).await;
    }
}

pub fn errors(msgs: &[ServerMsg]) -> Vec<String> {
    msgs.iter()
        .filter_map(|m| match m {
            ServerMsg::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
