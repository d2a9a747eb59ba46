//! Inbound message dispatch
//!
//! Every handler failure is turned into an `ERROR` reply here; nothing a
//! client sends can close its connection or take down the process.

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anticheat::{Detection, HitTelemetry};
use crate::app::AppState;
use crate::error::{GameError, GameResult};
use crate::session::PlayerUpdate;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::chrono_duration;

use super::protocol::{ClientMsg, PlayerData, PlayerId, ServerMsg, ShotHit, Vec3};

/// Per-connection state owned by the socket task
pub struct ConnectionContext {
    /// Verified identity from the upgrade token
    pub identity: PlayerId,
    /// Set once PLAYER_CONNECT succeeds
    pub player_id: Option<PlayerId>,
    pub conn_id: Option<Uuid>,
    pub tx: mpsc::Sender<ServerMsg>,
    limiter: ConnectionRateLimiter,
}

impl ConnectionContext {
    pub fn new(identity: PlayerId, tx: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            identity,
            player_id: None,
            conn_id: None,
            tx,
            limiter: ConnectionRateLimiter::default(),
        }
    }

    /// Shots draw on their own quota
    fn admit(&self, msg: Option<&ClientMsg>) -> bool {
        match msg {
            Some(ClientMsg::PlayerShoot { .. }) => self.limiter.check_shot(),
            _ => self.limiter.check(),
        }
    }

    fn send(&self, msg: ServerMsg) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(player_id = %self.identity, "Outbound buffer full, dropping reply")
            }
            Err(TrySendError::Closed(_)) => {
                debug!(player_id = %self.identity, "Connection closed, dropping reply")
            }
        }
    }

    fn connected(&self) -> GameResult<&PlayerId> {
        self.player_id.as_ref().ok_or(GameError::NotConnected)
    }
}

/// Parse and handle one text frame
pub async fn handle_text(state: &AppState, ctx: &mut ConnectionContext, text: &str) {
    let parsed = serde_json::from_str::<ClientMsg>(text);
    if !ctx.admit(parsed.as_ref().ok()) {
        warn!(player_id = %ctx.identity, "Rate limited input message");
        return;
    }

    let result = match parsed {
        Ok(msg) => handle_message(state, ctx, msg).await,
        Err(e) => Err(GameError::Validation(e.to_string())),
    };

    if let Err(e) = result {
        match &e {
            GameError::ConcurrencyConflict(_) | GameError::StoreUnavailable(_) => {
                warn!(player_id = %ctx.identity, error = %e, "Message handling failed")
            }
            _ => debug!(player_id = %ctx.identity, error = %e, "Rejected client message"),
        }
        ctx.send(ServerMsg::error(e.to_string()));
    }
}

pub async fn handle_message(
    state: &AppState,
    ctx: &mut ConnectionContext,
    msg: ClientMsg,
) -> GameResult<()> {
    match msg {
        ClientMsg::PlayerConnect { player_id } => on_connect(state, ctx, player_id).await,
        ClientMsg::Heartbeat {} => {
            ctx.send(ServerMsg::HeartbeatAck {});
            Ok(())
        }
        ClientMsg::JoinMatchmaking { player_data } => {
            on_join_matchmaking(state, ctx, player_data).await
        }
        ClientMsg::LeaveMatchmaking {} => {
            let player_id = ctx.connected()?;
            let removed = state.matchmaking.leave_queue(player_id).await;
            ctx.send(ServerMsg::MatchmakingLeft { removed });
            Ok(())
        }
        ClientMsg::JoinSession { session_id } => on_join_session(state, ctx, session_id),
        ClientMsg::PlayerUpdate {
            position,
            health,
            shield,
            weapons,
        } => on_player_update(
            state,
            ctx,
            PlayerUpdate {
                position,
                health,
                shield,
                weapons,
            },
        ),
        ClientMsg::PlayerShoot {
            weapon,
            direction,
            hit,
        } => on_player_shoot(state, ctx, weapon, direction, hit),
        ClientMsg::PlayerKill { victim_id } => on_player_kill(state, ctx, victim_id).await,
        ClientMsg::GetStats {} => {
            let player_id = ctx.connected()?;
            let stats = state.stats.get(player_id).await;
            ctx.send(ServerMsg::PlayerStats { stats });
            Ok(())
        }
    }
}

async fn on_connect(
    state: &AppState,
    ctx: &mut ConnectionContext,
    player_id: PlayerId,
) -> GameResult<()> {
    if player_id != ctx.identity {
        return Err(GameError::Validation(
            "playerId does not match the authenticated identity".into(),
        ));
    }

    let now = Utc::now();
    if ctx.player_id.is_none() {
        let conn_id = state.registry.register(player_id.clone(), ctx.tx.clone());
        if let Some(session_id) = state.sessions.session_of(&player_id) {
            state.registry.set_session(&player_id, session_id);
        }
        ctx.conn_id = Some(conn_id);
        ctx.player_id = Some(player_id.clone());

        state
            .router
            .broadcast_to_friends(
                &player_id,
                &ServerMsg::FriendStatus {
                    player_id: player_id.clone(),
                    online: true,
                },
            )
            .await;
        info!(player_id = %player_id, conn_id = %conn_id, "Player connected");
    }

    ctx.send(ServerMsg::Connected { timestamp: now });
    if let Some(session_id) = state.matchmaking.take_notification(&player_id, now) {
        ctx.send(ServerMsg::MatchReady { session_id });
    }
    Ok(())
}

async fn on_join_matchmaking(
    state: &AppState,
    ctx: &ConnectionContext,
    player_data: PlayerData,
) -> GameResult<()> {
    let player_id = ctx.connected()?;
    let outcome = state
        .matchmaking
        .join_queue(player_id, &player_data, Utc::now())
        .await?;

    ctx.send(ServerMsg::MatchmakingJoined {
        queued: outcome.queued,
        queue_size: outcome.queue_size,
    });

    if outcome.queued {
        state
            .router
            .broadcast_to_party(
                player_id,
                &ServerMsg::PartyUpdate {
                    player_id: player_id.clone(),
                    status: "matchmaking".into(),
                },
            )
            .await;
    }
    Ok(())
}

fn on_join_session(state: &AppState, ctx: &ConnectionContext, session_id: Uuid) -> GameResult<()> {
    let player_id = ctx.connected()?;
    let now = Utc::now();

    let (snapshot, started) = state.sessions.with_session(session_id, |session| {
        if !session.is_member(player_id) {
            return Err(GameError::Validation("not a member of this session".into()));
        }
        let started = session.mark_present(player_id, now)?;
        Ok((session.clone(), started))
    })?;

    state.registry.set_session(player_id, session_id);
    ctx.send(ServerMsg::SessionJoined {
        game_state: snapshot.clone(),
    });

    if started {
        state.router.session_broadcast(
            session_id,
            &ServerMsg::MatchStarted {
                players: snapshot.players,
            },
            None,
        );
        info!(session_id = %session_id, "Match started");
    }
    Ok(())
}

/// Session the connection is attached to
fn current_session(state: &AppState, player_id: &PlayerId) -> GameResult<Uuid> {
    state
        .registry
        .session_of(player_id)
        .ok_or_else(|| GameError::Validation("join a session first".into()))
}

fn on_player_update(state: &AppState, ctx: &ConnectionContext, update: PlayerUpdate) -> GameResult<()> {
    let player_id = ctx.connected()?;
    let session_id = current_session(state, player_id)?;
    let now = Utc::now();

    let (movement, player) = state.sessions.with_session(session_id, |session| {
        let movement = session.update_player(player_id, update, now)?;
        let player = session
            .player(player_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound(format!("player {player_id} in session")))?;
        Ok((movement, player))
    })?;

    if let Some(movement) = movement {
        let detections = state.anticheat.evaluate_movement(player_id, &movement, now);
        alert(state, session_id, player_id, &detections);
    }

    state.router.session_broadcast(
        session_id,
        &ServerMsg::PlayerStateUpdate {
            player_id: player_id.clone(),
            position: player.position,
            health: player.health,
            shield: player.shield,
        },
        Some(player_id),
    );
    Ok(())
}

fn on_player_shoot(
    state: &AppState,
    ctx: &ConnectionContext,
    weapon: String,
    direction: Vec3,
    hit: Option<ShotHit>,
) -> GameResult<()> {
    let player_id = ctx.connected()?;
    if !direction.is_finite() {
        return Err(GameError::Validation("direction must be finite".into()));
    }
    let session_id = current_session(state, player_id)?;
    let now = Utc::now();
    let window = chrono_duration(state.anticheat.config().rapid_fire_window);

    let (shots, telemetry) = state.sessions.with_session(session_id, |session| {
        let shots = session.record_shot(player_id, now, window)?;
        let telemetry = match &hit {
            Some(hit) => {
                let (shooter, target, recent_hits) =
                    session.record_hit(player_id, &hit.target_id, hit.headshot)?;
                Some(HitTelemetry {
                    shooter,
                    target,
                    line_of_sight: hit.line_of_sight,
                    recent_hits,
                })
            }
            None => None,
        };
        Ok((shots, telemetry))
    })?;

    let detections = state
        .anticheat
        .evaluate_shot(player_id, &shots, telemetry.as_ref(), now);
    alert(state, session_id, player_id, &detections);

    state.router.session_broadcast(
        session_id,
        &ServerMsg::PlayerShot {
            player_id: player_id.clone(),
            weapon,
            direction,
            timestamp: now,
        },
        Some(player_id),
    );
    Ok(())
}

async fn on_player_kill(
    state: &AppState,
    ctx: &ConnectionContext,
    victim_id: PlayerId,
) -> GameResult<()> {
    let player_id = ctx.connected()?;
    let session_id = current_session(state, player_id)?;
    let killer_id = (victim_id != *player_id).then(|| player_id.clone());
    let now = Utc::now();

    let (eliminated, results) = state.sessions.with_session(session_id, |session| {
        let already_out = session.player(&victim_id).is_some_and(|p| !p.is_alive);
        let results = session.eliminate(&victim_id, killer_id.as_ref(), now)?;
        Ok((!already_out, results))
    })?;

    if !eliminated {
        debug!(victim_id = %victim_id, "Victim already eliminated");
        return Ok(());
    }

    state.router.session_broadcast(
        session_id,
        &ServerMsg::PlayerEliminated {
            victim_id: victim_id.clone(),
            killer_id,
            timestamp: now,
        },
        None,
    );
    info!(session_id = %session_id, victim_id = %victim_id, "Player eliminated");

    if let Some(results) = results {
        state.concluder.conclude(&results).await;
    }
    Ok(())
}

/// Advisory only: tell the session, never reject the triggering message
fn alert(state: &AppState, session_id: Uuid, player_id: &PlayerId, detections: &[Detection]) {
    for detection in detections {
        state.router.session_broadcast(
            session_id,
            &ServerMsg::AnticheatAlert {
                player_id: player_id.clone(),
                reason: detection.reason.clone(),
                severity: detection.severity,
            },
            None,
        );
    }
}

/// Release registry and queue membership. Session membership is left
/// alone so the match carries on for everyone else.
pub async fn disconnect(state: &AppState, ctx: &ConnectionContext) {
    let (Some(player_id), Some(conn_id)) = (&ctx.player_id, ctx.conn_id) else {
        return;
    };
    if !state.registry.unregister(player_id, conn_id) {
        debug!(player_id = %player_id, "Connection already replaced");
        return;
    }

    state.matchmaking.leave_queue(player_id).await;
    state
        .router
        .broadcast_to_friends(
            player_id,
            &ServerMsg::FriendStatus {
                player_id: player_id.clone(),
                online: false,
            },
        )
        .await;
    info!(player_id = %player_id, "Player disconnected");
}
