//! Targeted, session-scoped and roster-scoped delivery

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::RosterProvider;
use crate::ws::protocol::{PlayerId, ServerMsg};

use super::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    roster: Arc<dyn RosterProvider>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, roster: Arc<dyn RosterProvider>) -> Self {
        Self { registry, roster }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send to one player if connected
    pub fn direct_send(&self, player_id: &PlayerId, msg: ServerMsg) -> bool {
        match self.registry.sender(player_id) {
            Some(tx) => deliver(player_id, &tx, msg),
            None => {
                debug!(player_id = %player_id, "Direct send to offline player skipped");
                false
            }
        }
    }

    /// Send to every connection bound to `session_id`. Returns the number
    /// of connections reached.
    pub fn session_broadcast(
        &self,
        session_id: Uuid,
        msg: &ServerMsg,
        exclude: Option<&PlayerId>,
    ) -> usize {
        self.registry
            .members_of(session_id)
            .into_iter()
            .filter(|(id, _)| Some(id) != exclude)
            .filter(|(id, tx)| deliver(id, tx, msg.clone()))
            .count()
    }

    /// Send to the player's live friends
    pub async fn broadcast_to_friends(&self, player_id: &PlayerId, msg: &ServerMsg) -> usize {
        match self.roster.friends_of(player_id).await {
            Ok(friends) => self.send_all(&friends, Some(player_id), msg),
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Friend roster lookup failed");
                0
            }
        }
    }

    /// Send to the player's live party members, excluding the player
    pub async fn broadcast_to_party(&self, player_id: &PlayerId, msg: &ServerMsg) -> usize {
        match self.roster.party_members_of(player_id).await {
            Ok(members) => self.send_all(&members, Some(player_id), msg),
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Party roster lookup failed");
                0
            }
        }
    }

    fn send_all(&self, targets: &[PlayerId], exclude: Option<&PlayerId>, msg: &ServerMsg) -> usize {
        targets
            .iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| self.registry.sender(id).map(|tx| (id, tx)))
            .filter(|(id, tx)| deliver(id, tx, msg.clone()))
            .count()
    }
}

/// Non-blocking enqueue onto a connection's outbound channel
fn deliver(player_id: &PlayerId, tx: &mpsc::Sender<ServerMsg>, msg: ServerMsg) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(player_id = %player_id, "Outbound buffer full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(player_id = %player_id, "Connection closed, dropping message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StaticRoster;

    fn router(roster: StaticRoster) -> BroadcastRouter {
        BroadcastRouter::new(Arc::new(ConnectionRegistry::new()), Arc::new(roster))
    }

    fn connect(router: &BroadcastRouter, id: &str) -> mpsc::Receiver<ServerMsg> {
        let (tx, rx) = mpsc::channel(8);
        router.registry().register(id.into(), tx);
        rx
    }

    #[test]
    fn session_broadcast_honours_exclusion() {
        let router = router(StaticRoster::new());
        let session = Uuid::new_v4();
        let mut a = connect(&router, "a");
        let mut b = connect(&router, "b");
        let mut outsider = connect(&router, "c");
        router.registry().set_session(&"a".into(), session);
        router.registry().set_session(&"b".into(), session);

        let reached = router.session_broadcast(session, &ServerMsg::HeartbeatAck {}, Some(&"a".into()));
        assert_eq!(reached, 1);
        assert!(a.try_recv().is_err());
        assert!(matches!(b.try_recv(), Ok(ServerMsg::HeartbeatAck {})));
        assert!(outsider.try_recv().is_err());
    }

    #[test]
    fn direct_send_to_offline_player_is_dropped() {
        let router = router(StaticRoster::new());
        assert!(!router.direct_send(&"nobody".into(), ServerMsg::HeartbeatAck {}));
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let router = router(StaticRoster::new());
        let (tx, _rx) = mpsc::channel(1);
        router.registry().register("a".into(), tx);

        assert!(router.direct_send(&"a".into(), ServerMsg::HeartbeatAck {}));
        assert!(!router.direct_send(&"a".into(), ServerMsg::HeartbeatAck {}));
    }

    #[tokio::test]
    async fn party_fan_out_skips_self_and_offline_members() {
        let roster = StaticRoster::new();
        roster.set_party(&["a".into(), "b".into(), "offline".into()]);
        let router = router(roster);
        let mut a = connect(&router, "a");
        let mut b = connect(&router, "b");

        let msg = ServerMsg::PartyUpdate {
            player_id: "a".into(),
            status: "matchmaking".into(),
        };
        assert_eq!(router.broadcast_to_party(&"a".into(), &msg).await, 1);
        assert!(a.try_recv().is_err());
        assert!(matches!(b.try_recv(), Ok(ServerMsg::PartyUpdate { .. })));
    }

    #[tokio::test]
    async fn friends_are_resolved_through_the_registry() {
        let roster = StaticRoster::new();
        roster.add_friendship(&"a".into(), &"b".into());
        roster.add_friendship(&"a".into(), &"c".into());
        let router = router(roster);
        let mut b = connect(&router, "b");

        let msg = ServerMsg::FriendStatus {
            player_id: "a".into(),
            online: true,
        };
        assert_eq!(router.broadcast_to_friends(&"a".into(), &msg).await, 1);
        assert!(matches!(b.try_recv(), Ok(ServerMsg::FriendStatus { online: true, .. })));
    }
}
