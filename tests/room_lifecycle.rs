//! Room scenarios driven on the logical clock

mod support;

use std::time::Duration;

use militia_room_server::game::environment::Environment;
use militia_room_server::game::{Room, RoomSettings};
use militia_room_server::ws::protocol::{ClientMsg, MoveKeys, ServerMsg};
use uuid::Uuid;

use support::{ClosedSink, RecordingSink};

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn room() -> Room {
    Room::with_seed("arena", RoomSettings::default(), 42)
}

fn open_room() -> Room {
    let open = Environment::with_obstacles(Vec::new());
    Room::with_environment("open", RoomSettings::default(), open, 7)
}

fn is_game_state(msg: &ServerMsg) -> bool {
    matches!(msg, ServerMsg::GameState { .. })
}

/// Hold left or right, whichever side has more room to run
fn walk_toward_open_side(room: &mut Room, id: Uuid) {
    let x = room.player(&id).unwrap().x;
    let go_left = x > room_center();
    let keys = MoveKeys {
        left: go_left,
        right: !go_left,
        ..MoveKeys::default()
    };
    room.handle_player_input(id, ClientMsg::Move { keys, gun_angle: 0.0 });
}

fn room_center() -> f32 {
    Environment::default().world_width / 2.0
}

#[test]
fn round_ends_after_countdown_and_restarts_after_pause() {
    let mut room = room();
    let a = Uuid::new_v4();
    let sink = RecordingSink::new();
    room.add_player(a, sink.boxed(), "solo");

    room.advance_by(secs(299));
    assert_eq!(room.round_time(), 1);
    assert_eq!(sink.count(|m| matches!(m, ServerMsg::RoundEnd { .. })), 0);

    room.advance_by(secs(1));
    assert_eq!(room.round_time(), 0);
    assert_eq!(sink.count(|m| matches!(m, ServerMsg::RoundTime { .. })), 300);

    let messages = sink.messages();
    let round_end = messages
        .iter()
        .find_map(|m| match m {
            ServerMsg::RoundEnd { scores, ranking } => Some((scores.clone(), ranking.clone())),
            _ => None,
        })
        .expect("round end broadcast");
    assert_eq!(round_end.0.get(&a), Some(&0));
    assert_eq!(round_end.1.len(), 1);
    assert_eq!(round_end.1[0].rank, 1);
    assert_eq!(round_end.1[0].client_id, a);
    assert_eq!(round_end.1[0].name, "solo");

    room.advance_by(secs(9));
    assert_eq!(sink.count(|m| matches!(m, ServerMsg::RoundStart { .. })), 0);

    room.advance_by(secs(1));
    assert_eq!(
        sink.count(|m| matches!(m, ServerMsg::RoundStart { round_time: 300 })),
        1
    );
    assert_eq!(room.bullet_count(), 0);
    assert_eq!(room.round_time(), 300);
    assert!(!room.player(&a).unwrap().is_dead);
}

#[test]
fn joiner_gets_full_state_and_others_get_announcements() {
    let mut room = room();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (sink_a, sink_b) = (RecordingSink::new(), RecordingSink::new());

    room.add_player(a, sink_a.boxed(), "a");
    room.add_player(b, sink_b.boxed(), "b");

    match sink_b.messages().first() {
        Some(ServerMsg::InitialGameState {
            players,
            bullets,
            scores,
            round_time,
            room_id,
            environment,
        }) => {
            assert_eq!(players.len(), 2);
            assert!(bullets.is_empty());
            assert_eq!(scores.len(), 2);
            assert_eq!(*round_time, 300);
            assert_eq!(room_id, "arena");
            assert_eq!(environment.world_width, 2160.0);
            assert_eq!(environment.obstacles.len(), 8);
        }
        other => panic!("expected INITIAL_GAME_STATE first, got {other:?}"),
    }

    assert_eq!(
        sink_a.count(|m| matches!(m, ServerMsg::PlayerJoined { player, .. } if player.id == b)),
        1
    );
    assert_eq!(sink_b.count(|m| matches!(m, ServerMsg::PlayerJoined { .. })), 0);

    assert!(room.remove_player(b));
    assert_eq!(
        sink_a.count(|m| matches!(m, ServerMsg::PlayerLeft { client_id } if *client_id == b)),
        1
    );
}

#[test]
fn last_player_leaving_stops_all_timers() {
    let mut room = room();
    let a = Uuid::new_v4();
    room.add_player(a, RecordingSink::new().boxed(), "a");
    room.handle_player_input(a, ClientMsg::Shoot);
    room.handle_player_input(a, ClientMsg::Reload);

    room.advance_by(secs(2));
    assert_eq!(room.round_time(), 298);

    room.remove_player(a);
    assert!(room.is_empty());
    assert!(!room.is_running());
    assert_eq!(room.next_deadline(), None);

    room.advance_by(secs(30));
    assert_eq!(room.round_time(), 298);
}

#[test]
fn shots_inside_cooldown_are_dropped() {
    let mut room = room();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let observer = RecordingSink::new();
    room.add_player(a, RecordingSink::new().boxed(), "a");
    room.add_player(b, observer.boxed(), "b");

    room.handle_player_input(a, ClientMsg::Shoot);
    room.advance_by(ms(50));
    room.handle_player_input(a, ClientMsg::Shoot);
    room.advance_by(ms(50));
    room.handle_player_input(a, ClientMsg::Shoot);

    let ids: Vec<u64> = observer
        .messages()
        .iter()
        .filter_map(|m| match m {
            ServerMsg::BulletCreated { bullet } => Some(bullet.id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[1], ids[0] + 1);
    assert_eq!(room.player(&a).unwrap().ammo, 23);
}

#[test]
fn reload_completes_after_four_seconds() {
    let mut room = room();
    let a = Uuid::new_v4();
    room.add_player(a, RecordingSink::new().boxed(), "a");

    room.handle_player_input(a, ClientMsg::Shoot);
    room.handle_player_input(a, ClientMsg::Reload);
    assert!(room.player(&a).unwrap().is_reloading);

    room.advance_by(ms(3999));
    let player = room.player(&a).unwrap();
    assert!(player.is_reloading);
    assert_eq!(player.ammo, 24);

    room.advance_by(ms(1));
    let player = room.player(&a).unwrap();
    assert!(!player.is_reloading);
    assert_eq!(player.ammo, 25);
}

#[test]
fn jetpack_fuel_recovers_after_release() {
    let mut room = room();
    let a = Uuid::new_v4();
    room.add_player(a, RecordingSink::new().boxed(), "a");

    let thrust = MoveKeys {
        up: true,
        ..MoveKeys::default()
    };
    room.handle_player_input(a, ClientMsg::Move { keys: thrust, gun_angle: 0.0 });
    room.advance_by(ms(500));
    room.handle_player_input(
        a,
        ClientMsg::Move {
            keys: MoveKeys::default(),
            gun_angle: 0.0,
        },
    );
    room.advance_by(ms(20));
    assert!(room.player(&a).unwrap().jetpack_fuel < 100.0);

    room.advance_by(secs(3));
    assert_eq!(room.player(&a).unwrap().jetpack_fuel, 100.0);
}

#[test]
fn failing_client_does_not_block_others() {
    let mut room = room();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (sink_b, sink_c) = (RecordingSink::new(), RecordingSink::new());

    room.add_player(b, sink_b.boxed(), "b");
    room.add_player(a, Box::new(ClosedSink), "broken");
    room.add_player(c, sink_c.boxed(), "c");

    room.handle_player_input(a, ClientMsg::Shoot);

    assert_eq!(sink_b.count(|m| matches!(m, ServerMsg::BulletCreated { .. })), 1);
    assert_eq!(sink_c.count(|m| matches!(m, ServerMsg::BulletCreated { .. })), 1);
    assert_eq!(
        sink_b.count(|m| matches!(m, ServerMsg::PlayerJoined { player, .. } if player.id == c)),
        1
    );
}

#[test]
fn input_from_strangers_and_unknown_kinds_is_ignored() {
    let mut room = room();
    let a = Uuid::new_v4();
    let sink = RecordingSink::new();
    room.add_player(a, sink.boxed(), "a");
    sink.clear();

    room.handle_player_input(Uuid::new_v4(), ClientMsg::Shoot);
    room.handle_player_input(a, ClientMsg::Unknown);

    assert!(sink.messages().is_empty());
    assert_eq!(room.bullet_count(), 0);
    assert_eq!(room.player(&a).unwrap().ammo, 25);
}

#[test]
fn idle_grounded_player_produces_no_game_state() {
    let mut room = open_room();
    let a = Uuid::new_v4();
    let sink = RecordingSink::new();
    room.add_player(a, sink.boxed(), "idle");

    room.advance_by(secs(3));
    assert!(room.player(&a).unwrap().on_ground);
    sink.clear();

    room.advance_by(secs(1));
    assert_eq!(sink.count(is_game_state), 0);
}

#[test]
fn moving_player_is_broadcast_thirty_times_a_second() {
    let mut room = open_room();
    let a = Uuid::new_v4();
    let sink = RecordingSink::new();
    room.add_player(a, sink.boxed(), "runner");

    room.advance_by(secs(3));
    walk_toward_open_side(&mut room, a);
    sink.clear();

    let x0 = room.player(&a).unwrap().x;
    room.advance_by(secs(1));
    let x1 = room.player(&a).unwrap().x;
    assert!((x1 - x0).abs() > 250.0, "x0={x0} x1={x1}");

    let sent = sink.count(is_game_state);
    assert!((29..=31).contains(&sent), "sent {sent} GAME_STATE in one second");
}

#[test]
fn game_state_carries_only_changed_players() {
    let mut room = open_room();
    let (runner, idle) = (Uuid::new_v4(), Uuid::new_v4());
    let sink = RecordingSink::new();
    room.add_player(runner, sink.boxed(), "runner");
    room.add_player(idle, RecordingSink::new().boxed(), "idle");

    room.advance_by(secs(3));
    walk_toward_open_side(&mut room, runner);
    sink.clear();
    room.advance_by(secs(1));

    let states: Vec<Vec<Uuid>> = sink
        .messages()
        .iter()
        .filter_map(|m| match m {
            ServerMsg::GameState { players, .. } => Some(players.iter().map(|p| p.id).collect()),
            _ => None,
        })
        .collect();
    assert!(!states.is_empty());
    for ids in states {
        assert_eq!(ids, vec![runner]);
    }
}

#[test]
fn every_created_bullet_is_destroyed() {
    let mut room = room();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let observer = RecordingSink::new();
    room.add_player(a, RecordingSink::new().boxed(), "a");
    room.add_player(b, observer.boxed(), "b");

    for _ in 0..5 {
        room.handle_player_input(a, ClientMsg::Shoot);
        room.advance_by(ms(150));
    }
    room.advance_by(secs(6));

    let mut created = Vec::new();
    let mut destroyed = Vec::new();
    for msg in observer.messages() {
        match msg {
            ServerMsg::BulletCreated { bullet } => created.push(bullet.id),
            ServerMsg::BulletDestroyed { bullet_id } => destroyed.push(bullet_id),
            _ => {}
        }
    }
    destroyed.sort_unstable();

    assert_eq!(created.len(), 5);
    assert_eq!(created, destroyed);
    assert_eq!(room.bullet_count(), 0);
}
