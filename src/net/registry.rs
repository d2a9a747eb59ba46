//! Player id -> live transport and current session

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{PlayerId, ServerMsg};

/// Outbound queue depth per connection
pub const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct Connection {
    conn_id: Uuid,
    tx: mpsc::Sender<ServerMsg>,
    session_id: Option<Uuid>,
}

/// Holds one transport per player. Sessions never hold transports; the
/// registry keeps the session id and broadcasts resolve through it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<PlayerId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `player_id` to a transport, replacing any older connection.
    /// The session binding survives a reconnect.
    pub fn register(&self, player_id: PlayerId, tx: mpsc::Sender<ServerMsg>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let session_id = self
            .connections
            .get(&player_id)
            .and_then(|c| c.session_id);

        if let Some(old) = self.connections.insert(
            player_id.clone(),
            Connection {
                conn_id,
                tx,
                session_id,
            },
        ) {
            info!(player_id = %player_id, old_conn = %old.conn_id, "Replaced existing connection");
        }
        debug!(player_id = %player_id, conn_id = %conn_id, "Registered connection");
        conn_id
    }

    /// Remove the binding if it still belongs to `conn_id`
    pub fn unregister(&self, player_id: &PlayerId, conn_id: Uuid) -> bool {
        let removed = self
            .connections
            .remove_if(player_id, |_, c| c.conn_id == conn_id)
            .is_some();
        if removed {
            debug!(player_id = %player_id, conn_id = %conn_id, "Unregistered connection");
        }
        removed
    }

    pub fn set_session(&self, player_id: &PlayerId, session_id: Uuid) -> bool {
        match self.connections.get_mut(player_id) {
            Some(mut c) => {
                c.session_id = Some(session_id);
                true
            }
            None => false,
        }
    }

    pub fn session_of(&self, player_id: &PlayerId) -> Option<Uuid> {
        self.connections.get(player_id).and_then(|c| c.session_id)
    }

    /// Forget the session binding if it points at `session_id`
    pub fn clear_session(&self, player_id: &PlayerId, session_id: Uuid) {
        if let Some(mut c) = self.connections.get_mut(player_id) {
            if c.session_id == Some(session_id) {
                c.session_id = None;
            }
        }
    }

    pub fn sender(&self, player_id: &PlayerId) -> Option<mpsc::Sender<ServerMsg>> {
        self.connections.get(player_id).map(|c| c.tx.clone())
    }

    /// Live transports bound to `session_id`
    pub fn members_of(&self, session_id: Uuid) -> Vec<(PlayerId, mpsc::Sender<ServerMsg>)> {
        self.connections
            .iter()
            .filter(|c| c.session_id == Some(session_id))
            .map(|c| (c.key().clone(), c.tx.clone()))
            .collect()
    }

    pub fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.connections.contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
