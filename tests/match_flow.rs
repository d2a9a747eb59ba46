mod common;

use chrono::Utc;
use common::{config, errors, state, state_from, state_with, TestClient};
use match_core::anticheat::{DetectionKind, Severity};
use match_core::config::GameConfig;
use match_core::session::SessionStatus;
use match_core::store::{Persistence, StaticRoster};
use match_core::ws::protocol::{PlayerId, ServerMsg};
use uuid::Uuid;

const JOIN_SOLO: &str = r#"{"type":"JOIN_MATCHMAKING","playerData":{"mode":"solo","region":"x"}}"#;

fn join_session(id: Uuid) -> String {
    format!(r#"{{"type":"JOIN_SESSION","sessionId":"{id}"}}"#)
}

fn match_ready(msgs: &[ServerMsg]) -> Option<Uuid> {
    msgs.iter().find_map(|m| match m {
        ServerMsg::MatchReady { session_id } => Some(*session_id),
        _ => None,
    })
}

/// Connect, queue and seat `names` in one active session
async fn active_match(
    state: &match_core::app::AppState,
    names: &[&str],
) -> (Uuid, Vec<TestClient>) {
    let mut clients = Vec::new();
    for name in names {
        let mut client = TestClient::connected(state, name).await;
        client.send(state, JOIN_SOLO).await;
        clients.push(client);
    }
    assert_eq!(state.matchmaking.tick(Utc::now()).await, 1);

    let session_id = match_ready(&clients[0].drain()).expect("MATCH_READY");
    for client in clients.iter_mut() {
        client.send(state, &join_session(session_id)).await;
    }
    for client in clients.iter_mut() {
        client.drain();
    }
    (session_id, clients)
}

#[tokio::test]
async fn full_match_from_queue_to_results() {
    let state = state();
    let mut a = TestClient::connected(&state, "A").await;
    let mut b = TestClient::connected(&state, "B").await;
    let mut c = TestClient::connected(&state, "C").await;
    assert!(matches!(a.drain()[..], [ServerMsg::Connected { .. }]));

    for client in [&mut a, &mut b, &mut c] {
        client.send(&state, JOIN_SOLO).await;
    }
    assert!(matches!(
        c.drain()[..],
        [ServerMsg::Connected { .. }, ServerMsg::MatchmakingJoined { queued: true, queue_size: 3 }]
    ));

    assert_eq!(state.matchmaking.tick(Utc::now()).await, 1);
    assert_eq!(state.matchmaking.queue_size().await, 0);

    let session_id = match_ready(&a.drain()).expect("A notified");
    assert_eq!(match_ready(&b.drain()), Some(session_id));
    assert_eq!(match_ready(&c.drain()), Some(session_id));

    // Seating: the match starts only once everyone is present
    a.send(&state, &join_session(session_id)).await;
    b.send(&state, &join_session(session_id)).await;
    let seated = a.drain();
    assert!(matches!(&seated[..], [ServerMsg::SessionJoined { game_state }] if game_state.status == SessionStatus::Waiting));

    c.send(&state, &join_session(session_id)).await;
    for client in [&mut a, &mut b] {
        assert!(client
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMsg::MatchStarted { players } if players.len() == 3)));
    }
    c.drain();

    // A eliminates B, then C
    a.send(&state, r#"{"type":"PLAYER_KILL","victimId":"B"}"#).await;
    assert!(matches!(
        &c.drain()[..],
        [ServerMsg::PlayerEliminated { victim_id, killer_id: Some(killer), .. }]
            if victim_id.as_str() == "B" && killer.as_str() == "A"
    ));

    a.send(&state, r#"{"type":"PLAYER_KILL","victimId":"C"}"#).await;
    let ended = b.drain();
    let (results, leaderboard) = ended
        .iter()
        .find_map(|m| match m {
            ServerMsg::MatchEnded {
                results,
                leaderboard,
            } => Some((results, leaderboard)),
            _ => None,
        })
        .expect("MATCH_ENDED reaches eliminated players too");

    assert_eq!(results.winner, Some(PlayerId::from("A")));
    let order: Vec<(&str, u32)> = leaderboard
        .iter()
        .map(|e| (e.player_id.as_str(), e.placement))
        .collect();
    assert_eq!(order, vec![("A", 1), ("C", 2), ("B", 3)]);

    // Session retired, players free to queue again
    assert!(!state.sessions.contains(&session_id));
    assert!(state.registry.session_of(&"A".into()).is_none());

    a.drain();
    a.send(&state, r#"{"type":"GET_STATS"}"#).await;
    match &a.drain()[..] {
        [ServerMsg::PlayerStats { stats }] => {
            assert_eq!(stats.matches_played, 1);
            assert_eq!(stats.wins, 1);
            assert_eq!(stats.kills, 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    a.send(&state, JOIN_SOLO).await;
    assert!(matches!(a.drain()[..], [ServerMsg::MatchmakingJoined { queued: true, .. }]));
}

#[tokio::test]
async fn bad_input_gets_error_and_connection_keeps_working() {
    let state = state();
    let mut client = TestClient::new("p1");

    client.send(&state, r#"{"type":"GET_STATS"}"#).await;
    client.send(&state, "{ nope").await;
    client.send(&state, r#"{"type":"PLAYER_CONNECT","playerId":"someone-else"}"#).await;
    assert_eq!(errors(&client.drain()).len(), 3);
    assert!(!state.registry.is_connected(&"p1".into()));

    client
        .send(&state, r#"{"type":"PLAYER_CONNECT","playerId":"p1"}"#)
        .await;
    client.send(&state, r#"{"type":"HEARTBEAT"}"#).await;
    assert!(matches!(
        client.drain()[..],
        [ServerMsg::Connected { .. }, ServerMsg::HeartbeatAck {}]
    ));

    client.send(&state, r#"{"type":"PLAYER_UPDATE","health":40}"#).await;
    assert_eq!(errors(&client.drain()), vec!["Invalid message: join a session first"]);
}

#[tokio::test]
async fn duplicate_queue_join_is_reported_not_failed() {
    let state = state();
    let mut client = TestClient::connected(&state, "p1").await;
    client.drain();

    client.send(&state, JOIN_SOLO).await;
    client.send(&state, JOIN_SOLO).await;
    assert!(matches!(
        client.drain()[..],
        [
            ServerMsg::MatchmakingJoined { queued: true, queue_size: 1 },
            ServerMsg::MatchmakingJoined { queued: false, queue_size: 1 }
        ]
    ));

    client.send(&state, r#"{"type":"LEAVE_MATCHMAKING"}"#).await;
    client.send(&state, r#"{"type":"LEAVE_MATCHMAKING"}"#).await;
    assert!(matches!(
        client.drain()[..],
        [
            ServerMsg::MatchmakingLeft { removed: true },
            ServerMsg::MatchmakingLeft { removed: false }
        ]
    ));
}

#[tokio::test]
async fn suspicious_movement_alerts_but_is_still_applied() {
    let state = state();
    let (session_id, mut clients) = active_match(&state, &["a", "b"]).await;

    // Spawn ring radius is 500, so jumping to the origin is a teleport
    clients[0]
        .send(&state, r#"{"type":"PLAYER_UPDATE","position":{"x":0,"y":0,"z":0}}"#)
        .await;

    let own = clients[0].drain();
    assert!(errors(&own).is_empty());
    assert!(own.iter().any(|m| matches!(
        m,
        ServerMsg::AnticheatAlert { severity: Severity::Critical, .. }
    )));

    let other = clients[1].drain();
    assert!(other.iter().any(|m| matches!(
        m,
        ServerMsg::PlayerStateUpdate { player_id, position, .. }
            if player_id.as_str() == "a" && position.x == 0.0
    )));

    let snapshot = state.sessions.snapshot(session_id).unwrap();
    assert_eq!(snapshot.player(&"a".into()).unwrap().position.x, 0.0);
    assert!(!state.anticheat.records(&"a".into(), Utc::now()).is_empty());
}

#[tokio::test]
async fn shots_are_broadcast_to_the_rest_of_the_session() {
    let state = state();
    let (_, mut clients) = active_match(&state, &["a", "b"]).await;

    clients[0]
        .send(
            &state,
            r#"{"type":"PLAYER_SHOOT","weapon":"rifle","direction":{"x":1,"y":0,"z":0},
                "hit":{"targetId":"b","headshot":true,"lineOfSight":true}}"#,
        )
        .await;

    assert!(clients[0].drain().is_empty());
    assert!(matches!(
        &clients[1].drain()[..],
        [ServerMsg::PlayerShot { player_id, weapon, .. }] if player_id.as_str() == "a" && weapon == "rifle"
    ));
}

#[tokio::test]
async fn disconnect_leaves_the_match_running_for_others() {
    let state = state();
    let (session_id, clients) = active_match(&state, &["a", "b", "c"]).await;
    let before = state.sessions.snapshot(session_id).unwrap();

    clients[2].disconnect(&state).await;

    let after = state.sessions.snapshot(session_id).unwrap();
    assert_eq!(after.status, SessionStatus::Active);
    assert_eq!(after.alive_count(), 3);
    for id in ["a", "b"] {
        let id = PlayerId::from(id);
        assert_eq!(
            before.player(&id).unwrap().position,
            after.player(&id).unwrap().position
        );
    }
    assert!(!state.registry.is_connected(&"c".into()));
    assert_eq!(state.registry.members_of(session_id).len(), 2);
}

#[tokio::test]
async fn offline_players_get_match_ready_on_reconnect() {
    let state = state();
    let now = Utc::now();
    let data = Default::default();
    tokio_test::assert_ok!(state.matchmaking.join_queue(&"a".into(), &data, now).await);
    tokio_test::assert_ok!(state.matchmaking.join_queue(&"b".into(), &data, now).await);
    let session = state.matchmaking.form_match(now).await.unwrap().unwrap();

    let mut a = TestClient::connected(&state, "a").await;
    assert!(matches!(
        a.drain()[..],
        [ServerMsg::Connected { .. }, ServerMsg::MatchReady { session_id }] if session_id == session.session_id
    ));

    // Second connect does not replay it
    a.send(&state, r#"{"type":"PLAYER_CONNECT","playerId":"a"}"#).await;
    assert!(matches!(a.drain()[..], [ServerMsg::Connected { .. }]));

    tokio_test::assert_err!(state.matchmaking.join_queue(&"a".into(), &data, now).await);
}

#[tokio::test]
async fn friends_see_presence_and_party_sees_matchmaking() {
    let roster = StaticRoster::new();
    roster.add_friendship(&"a".into(), &"f".into());
    roster.set_party(&["a".into(), "mate".into()]);
    let state = state_with(roster, Persistence::disabled());

    let mut friend = TestClient::connected(&state, "f").await;
    let mut mate = TestClient::connected(&state, "mate").await;
    friend.drain();
    mate.drain();

    let mut a = TestClient::connected(&state, "a").await;
    assert!(matches!(
        &friend.drain()[..],
        [ServerMsg::FriendStatus { player_id, online: true }] if player_id.as_str() == "a"
    ));

    a.send(&state, JOIN_SOLO).await;
    assert!(matches!(
        &mate.drain()[..],
        [ServerMsg::PartyUpdate { player_id, status }] if player_id.as_str() == "a" && status == "matchmaking"
    ));

    a.disconnect(&state).await;
    assert!(matches!(
        friend.drain()[..],
        [ServerMsg::FriendStatus { online: false, .. }]
    ));
    assert!(!state.matchmaking.is_queued(&"a".into()).await);
}

#[tokio::test]
async fn rapid_fire_burst_reaches_anticheat() {
    let state = state();
    let (_, mut clients) = active_match(&state, &["a", "b"]).await;

    let shot = r#"{"type":"PLAYER_SHOOT","weapon":"smg","direction":{"x":0,"y":1,"z":0}}"#;
    for _ in 0..101 {
        clients[0].send(&state, shot).await;
    }

    let seen = clients[1].drain();
    let shots = seen
        .iter()
        .filter(|m| matches!(m, ServerMsg::PlayerShot { .. }))
        .count();
    assert_eq!(shots, 101, "no shot is throttled away");
    assert!(seen.iter().any(|m| matches!(
        m,
        ServerMsg::AnticheatAlert { player_id, reason, severity: Severity::High }
            if player_id.as_str() == "a" && reason.starts_with("Rapid fire")
    )));

    let records = state.anticheat.records(&"a".into(), Utc::now());
    assert!(records.iter().any(|r| r.kind == DetectionKind::RapidFire));
}

#[tokio::test]
async fn general_messages_are_rate_limited_per_connection() {
    let state = state();
    let mut client = TestClient::connected(&state, "p1").await;
    client.drain();

    for _ in 0..60 {
        client.send(&state, r#"{"type":"HEARTBEAT"}"#).await;
    }
    let acks = client
        .drain()
        .iter()
        .filter(|m| matches!(m, ServerMsg::HeartbeatAck {}))
        .count();
    assert!(acks < 60, "excess frames are dropped");
    assert!(acks >= 25);
}

#[tokio::test]
async fn compatible_players_are_matched_as_they_join() {
    let mut config = config();
    config.game = GameConfig::default();
    let state = state_from(config);

    let mut a = TestClient::connected(&state, "A").await;
    let mut b = TestClient::connected(&state, "B").await;
    a.send(&state, JOIN_SOLO).await;
    assert!(match_ready(&a.drain()).is_none());

    b.send(&state, JOIN_SOLO).await;
    let session_id = match_ready(&b.drain()).expect("matched on join");
    assert_eq!(match_ready(&a.drain()), Some(session_id));
    assert_eq!(state.matchmaking.queue_size().await, 0);
}
