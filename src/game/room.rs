//! Room state and authoritative tick loop
//!
//! A `Room` is single-threaded: the tick, the round countdown and every
//! player-scoped timer run to completion one at a time via `advance_to`.
//! Callbacks that target a player look it up by id and do nothing if the
//! player has gone.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::util::time::{
    as_millis_f32, period_for_rate, Timer, NETWORK_UPDATE_TPS, SIMULATION_TPS,
};
use crate::ws::protocol::{ClientId, ClientMsg, RankEntry, ScoreTable, ServerMsg};

use super::bullet::{Bullet, BulletId};
use super::environment::Environment;
use super::player::Player;
use super::scheduler::{Scheduler, TimerEvent, TimerId};
use super::snapshot::{SnapshotBuilder, TickStats};

/// Round length in seconds
pub const ROUND_SECONDS: u32 = 300;

/// Pause between ROUND_END and ROUND_START
pub const ROUND_END_PAUSE: Duration = Duration::from_secs(10);

/// Delay from death to respawn
pub const RESPAWN_DELAY: Duration = Duration::from_millis(3000);

/// Per-room tunables
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// GAME_STATE broadcasts per second
    pub network_update_rate: u32,
    /// Round length in seconds
    pub round_seconds: u32,
    pub round_end_pause: Duration,
    pub respawn_delay: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_rate: SIMULATION_TPS,
            network_update_rate: NETWORK_UPDATE_TPS,
            round_seconds: ROUND_SECONDS,
            round_end_pause: ROUND_END_PAUSE,
            respawn_delay: RESPAWN_DELAY,
        }
    }
}

/// Outbound delivery errors
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// A client's outbound message sink. Delivery is fire-and-forget.
pub trait Outbound: Send {
    fn send(&self, payload: Arc<str>) -> Result<(), SendError>;
}

impl Outbound for mpsc::Sender<Arc<str>> {
    fn send(&self, payload: Arc<str>) -> Result<(), SendError> {
        self.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Room statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: String,
    pub player_count: usize,
    pub bullet_count: usize,
    pub game_started: bool,
    pub round_time: u32,
    pub max_tick_time_ms: f32,
    pub avg_tick_time_ms: f32,
    pub tick_rate: u32,
}

/// Hit resolved during a tick, broadcast after the bullet pass
#[derive(Debug, Clone, Copy)]
struct Hit {
    target_id: ClientId,
    shooter_id: ClientId,
    damage: f32,
    health: f32,
    killed: bool,
}

/// One match instance
pub struct Room {
    id: String,
    settings: RoomSettings,
    environment: Environment,

    players: HashMap<ClientId, Player>,
    /// Join order; also the collision scan order
    roster: Vec<ClientId>,
    bullets: BTreeMap<BulletId, Bullet>,
    next_bullet_id: BulletId,
    scores: HashMap<ClientId, u32>,
    clients: HashMap<ClientId, Box<dyn Outbound>>,

    round_time: u32,
    started: bool,

    scheduler: Scheduler,
    tick_timer: Option<TimerId>,
    round_timer: Option<TimerId>,
    round_restart_timer: Option<TimerId>,
    last_tick: Duration,

    snapshot_builder: SnapshotBuilder,
    tick_stats: TickStats,
    rng: ChaCha8Rng,
}

impl Room {
    pub fn new(id: impl Into<String>, settings: RoomSettings) -> Self {
        Self::with_seed(id, settings, rand::random())
    }

    /// Room with reproducible spawns and shot spread
    pub fn with_seed(id: impl Into<String>, settings: RoomSettings, seed: u64) -> Self {
        Self::with_environment(id, settings, Environment::default(), seed)
    }

    pub fn with_environment(
        id: impl Into<String>,
        settings: RoomSettings,
        environment: Environment,
        seed: u64,
    ) -> Self {
        let snapshot_builder = SnapshotBuilder::new(
            period_for_rate(settings.network_update_rate),
            period_for_rate(settings.tick_rate),
        );
        Self {
            id: id.into(),
            round_time: settings.round_seconds,
            settings,
            environment,
            players: HashMap::new(),
            roster: Vec::new(),
            bullets: BTreeMap::new(),
            next_bullet_id: 1,
            scores: HashMap::new(),
            clients: HashMap::new(),
            started: false,
            scheduler: Scheduler::new(),
            tick_timer: None,
            round_timer: None,
            round_restart_timer: None,
            last_tick: Duration::ZERO,
            snapshot_builder,
            tick_stats: TickStats::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, id: &ClientId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.len()
    }

    pub fn score(&self, id: &ClientId) -> Option<u32> {
        self.scores.get(id).copied()
    }

    pub fn round_time(&self) -> u32 {
        self.round_time
    }

    /// True while the tick and round timers are armed
    pub fn is_running(&self) -> bool {
        self.started
    }

    /// When the next timer is due; None once the room is stopped
    pub fn next_deadline(&self) -> Option<Duration> {
        self.scheduler.next_deadline()
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            room_id: self.id.clone(),
            player_count: self.players.len(),
            bullet_count: self.bullets.len(),
            game_started: self.started,
            round_time: self.round_time,
            max_tick_time_ms: self.tick_stats.max_ms(),
            avg_tick_time_ms: self.tick_stats.avg_ms(),
            tick_rate: self.settings.tick_rate,
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Spawn a player, send them the full state and tell everyone else.
    /// Capacity is the registry's concern; this always succeeds.
    pub fn add_player(
        &mut self,
        client_id: ClientId,
        outbound: Box<dyn Outbound>,
        name: impl Into<String>,
    ) {
        if self.players.contains_key(&client_id) {
            warn!(
                room_id = %self.id,
                client_id = %client_id,
                "Player already in room, replacing connection"
            );
            self.clients.insert(client_id, outbound);
            self.send_initial_state(client_id);
            return;
        }

        let name = name.into();
        let spawn = self.environment.safe_spawn_position(&mut self.rng);
        let player = Player::new(client_id, name.clone(), spawn);
        let joined = player.snapshot();

        self.players.insert(client_id, player);
        self.roster.push(client_id);
        self.scores.insert(client_id, 0);
        self.clients.insert(client_id, outbound);

        self.send_initial_state(client_id);

        if self.players.len() == 1 {
            self.start_game_loop();
        }

        info!(
            room_id = %self.id,
            client_id = %client_id,
            name = %name,
            player_count = self.players.len(),
            "Player joined room"
        );

        self.broadcast(
            &ServerMsg::PlayerJoined {
                player: joined,
                room_id: self.id.clone(),
            },
            Some(client_id),
        );
    }

    /// Deregister a player; stops the loop when the room empties
    pub fn remove_player(&mut self, client_id: ClientId) -> bool {
        if self.players.remove(&client_id).is_none() {
            return false;
        }

        self.roster.retain(|id| *id != client_id);
        self.scores.remove(&client_id);
        self.clients.remove(&client_id);
        self.scheduler.cancel_where(|event| event.player() == Some(client_id));

        info!(
            room_id = %self.id,
            client_id = %client_id,
            player_count = self.players.len(),
            "Player left room"
        );

        self.broadcast(&ServerMsg::PlayerLeft { client_id }, None);

        if self.players.is_empty() {
            self.stop_game_loop();
        }

        true
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Apply a decoded client command. Absent or dead players are ignored.
    pub fn handle_player_input(&mut self, client_id: ClientId, msg: ClientMsg) {
        let Some(player) = self.players.get_mut(&client_id) else {
            debug!(room_id = %self.id, client_id = %client_id, "Input for unknown player");
            return;
        };
        if player.is_dead {
            return;
        }

        debug!(room_id = %self.id, client_id = %client_id, kind = msg.kind(), "Player input");

        match msg {
            ClientMsg::Move { keys, gun_angle } => {
                player.update_input(keys, gun_angle);
            }
            ClientMsg::Shoot => {
                let Some(shot) = player.shoot(&mut self.scheduler, &mut self.rng) else {
                    return;
                };

                let id = self.next_bullet_id;
                self.next_bullet_id += 1;
                let bullet = Bullet::from_shot(id, &shot, self.scheduler.now());
                let created = bullet.snapshot();
                self.bullets.insert(id, bullet);

                debug!(
                    room_id = %self.id,
                    bullet_id = id,
                    bullets = self.bullets.len(),
                    "Bullet created"
                );
                self.broadcast(&ServerMsg::BulletCreated { bullet: created }, None);
            }
            ClientMsg::Jump => {
                player.jump();
            }
            ClientMsg::Reload => {
                player.reload(&mut self.scheduler);
            }
            ClientMsg::Unknown => {
                warn!(room_id = %self.id, client_id = %client_id, "Ignoring unknown input kind");
            }
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Fire every timer due up to `now`, in order, then move the clock to `now`
    pub fn advance_to(&mut self, now: Duration) {
        while let Some((timer, event)) = self.scheduler.pop_due(now) {
            self.on_timer(timer, event);
        }
        self.scheduler.set_now(now);
    }

    /// Advance by a relative amount
    pub fn advance_by(&mut self, delta: Duration) {
        let target = self.scheduler.now() + delta;
        self.advance_to(target);
    }

    fn on_timer(&mut self, timer: TimerId, event: TimerEvent) {
        match event {
            TimerEvent::Tick => self.tick(),
            TimerEvent::RoundCountdown => self.count_down_round(),
            TimerEvent::RoundRestart => {
                self.round_restart_timer = None;
                self.start_new_round();
            }
            TimerEvent::ReloadComplete(id) => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.finish_reload(timer);
                }
            }
            TimerEvent::JetpackRegen(id) => match self.players.get_mut(&id) {
                Some(player) => player.regen_jetpack(timer, &mut self.scheduler),
                None => {
                    self.scheduler.cancel(timer);
                }
            },
            TimerEvent::Respawn(id) => self.respawn_player(id),
        }
    }

    fn start_game_loop(&mut self) {
        if self.started {
            return;
        }

        info!(room_id = %self.id, "Starting game loop");
        self.started = true;
        self.last_tick = self.scheduler.now();

        if self.round_time == 0 && self.round_restart_timer.is_none() {
            self.round_time = self.settings.round_seconds;
        }

        let tick_period = period_for_rate(self.settings.tick_rate);
        self.tick_timer = Some(
            self.scheduler
                .schedule_repeating(tick_period, tick_period, TimerEvent::Tick),
        );
        self.round_timer = Some(self.scheduler.schedule_repeating(
            Duration::from_secs(1),
            Duration::from_secs(1),
            TimerEvent::RoundCountdown,
        ));
    }

    fn stop_game_loop(&mut self) {
        for timer in [
            self.tick_timer.take(),
            self.round_timer.take(),
            self.round_restart_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.scheduler.cancel(timer);
        }

        self.started = false;
        info!(room_id = %self.id, "Game loop stopped");
    }

    /// Tear down every outstanding timer and drop all state
    pub fn destroy(&mut self) {
        if self.started {
            self.stop_game_loop();
        }
        self.scheduler.cancel_all();
        self.players.clear();
        self.roster.clear();
        self.bullets.clear();
        self.scores.clear();
        self.clients.clear();
        info!(room_id = %self.id, "Room destroyed");
    }

    // ------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------

    /// One simulation step over the wall time elapsed since the previous one
    pub fn tick(&mut self) {
        let timer = Timer::new();
        let now = self.scheduler.now();
        let elapsed_ms = as_millis_f32(now.saturating_sub(self.last_tick));
        self.last_tick = now;

        for id in &self.roster {
            if let Some(player) = self.players.get_mut(id) {
                player.update(&self.environment, elapsed_ms, &mut self.scheduler);
            }
        }

        let mut removed: Vec<BulletId> = Vec::new();
        let mut hits: Vec<Hit> = Vec::new();

        for bullet in self.bullets.values_mut() {
            if !bullet.update(&self.environment, elapsed_ms, now) {
                removed.push(bullet.id);
                continue;
            }

            // Earliest-joined player whose box contains the bullet takes the hit.
            let target_id = self.roster.iter().copied().find(|id| {
                self.players
                    .get(id)
                    .is_some_and(|player| bullet.check_player_collision(player))
            });

            let Some(target_id) = target_id else {
                continue;
            };

            if let Some(target) = self.players.get_mut(&target_id) {
                if target.take_damage(bullet.damage) {
                    hits.push(Hit {
                        target_id,
                        shooter_id: bullet.owner_id,
                        damage: bullet.damage,
                        health: target.health,
                        killed: target.is_dead,
                    });
                }
            }

            bullet.destroy();
            removed.push(bullet.id);
        }

        for bullet_id in &removed {
            self.bullets.remove(bullet_id);
        }

        for hit in hits {
            self.broadcast(
                &ServerMsg::PlayerHit {
                    target_id: hit.target_id,
                    shooter_id: hit.shooter_id,
                    damage: hit.damage,
                    health: hit.health,
                },
                None,
            );

            if hit.killed {
                self.handle_player_death(hit.target_id, hit.shooter_id);
            }
        }

        for bullet_id in removed {
            self.broadcast(&ServerMsg::BulletDestroyed { bullet_id }, None);
        }

        if self.snapshot_builder.should_send(now) {
            self.snapshot_builder.mark_sent(now);
            self.send_network_update(now);
        }

        let tick_time = timer.elapsed();
        if self.tick_stats.record(tick_time) {
            warn!(
                room_id = %self.id,
                tick_ms = as_millis_f32(tick_time),
                "Slow tick (target: 16.67ms)"
            );
        }
    }

    /// Broadcast changed players and every live bullet, if there is anything
    fn send_network_update(&mut self, now: Duration) {
        let mut players = Vec::new();
        for id in &self.roster {
            if let Some(player) = self.players.get_mut(id) {
                if player.should_send_update(now) {
                    players.push(player.snapshot());
                }
            }
        }
        let bullets = self.bullets.values().map(Bullet::snapshot).collect();

        if let Some(msg) = self.snapshot_builder.build(players, bullets) {
            self.broadcast(&msg, None);
        }
    }

    /// Credit the killer, announce the death and schedule the respawn
    pub fn handle_player_death(&mut self, player_id: ClientId, killer_id: ClientId) {
        if !self.players.contains_key(&player_id) {
            return;
        }

        if killer_id != player_id {
            if let Some(score) = self.scores.get_mut(&killer_id) {
                *score += 1;
            }
        }

        info!(room_id = %self.id, player_id = %player_id, killer_id = %killer_id, "Player killed");

        self.broadcast(
            &ServerMsg::PlayerDeath {
                player_id,
                killer_id,
                scores: self.score_table(),
            },
            None,
        );

        self.scheduler
            .cancel_where(|event| *event == TimerEvent::Respawn(player_id));
        self.scheduler
            .schedule_once(self.settings.respawn_delay, TimerEvent::Respawn(player_id));
    }

    fn respawn_player(&mut self, player_id: ClientId) {
        let Some(player) = self.players.get_mut(&player_id) else {
            debug!(
                room_id = %self.id,
                player_id = %player_id,
                "Respawn for departed player skipped"
            );
            return;
        };

        let spawn = self.environment.safe_spawn_position(&mut self.rng);
        player.respawn(spawn, &mut self.scheduler);
        let snapshot = player.snapshot();

        self.broadcast(
            &ServerMsg::PlayerRespawned {
                player_id,
                player: snapshot,
            },
            None,
        );
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    fn count_down_round(&mut self) {
        if self.round_time == 0 {
            return;
        }

        self.round_time -= 1;
        self.broadcast(
            &ServerMsg::RoundTime {
                round_time: self.round_time,
            },
            None,
        );

        if self.round_time == 0 {
            self.end_round();
        }
    }

    /// Announce final scores and schedule the next round
    pub fn end_round(&mut self) {
        info!(room_id = %self.id, "Round ended");

        self.broadcast(
            &ServerMsg::RoundEnd {
                scores: self.score_table(),
                ranking: self.ranking(),
            },
            None,
        );

        if let Some(timer) = self.round_restart_timer.take() {
            self.scheduler.cancel(timer);
        }
        self.round_restart_timer = Some(
            self.scheduler
                .schedule_once(self.settings.round_end_pause, TimerEvent::RoundRestart),
        );
    }

    fn start_new_round(&mut self) {
        self.round_time = self.settings.round_seconds;

        // Everyone comes back now; pending death respawns are superseded.
        self.scheduler
            .cancel_where(|event| matches!(event, TimerEvent::Respawn(_)));

        for id in &self.roster {
            if let Some(player) = self.players.get_mut(id) {
                let spawn = self.environment.safe_spawn_position(&mut self.rng);
                player.respawn(spawn, &mut self.scheduler);
            }
        }

        self.bullets.clear();

        info!(room_id = %self.id, round_time = self.round_time, "Round started");
        self.broadcast(
            &ServerMsg::RoundStart {
                round_time: self.round_time,
            },
            None,
        );
    }

    /// Players by descending score; equal scores keep join order
    pub fn ranking(&self) -> Vec<RankEntry> {
        let mut rows: Vec<(ClientId, u32)> = self
            .roster
            .iter()
            .filter_map(|id| self.scores.get(id).map(|score| (*id, *score)))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));

        rows.into_iter()
            .enumerate()
            .map(|(index, (client_id, score))| RankEntry {
                rank: index as u32 + 1,
                client_id,
                score,
                name: self
                    .players
                    .get(&client_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "Player".to_string()),
            })
            .collect()
    }

    pub fn score_table(&self) -> ScoreTable {
        self.scores.iter().map(|(id, score)| (*id, *score)).collect()
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    fn send_initial_state(&self, client_id: ClientId) {
        let msg = ServerMsg::InitialGameState {
            environment: self.environment.snapshot(),
            players: self
                .roster
                .iter()
                .filter_map(|id| self.players.get(id))
                .map(Player::snapshot)
                .collect(),
            bullets: self.bullets.values().map(Bullet::snapshot).collect(),
            scores: self.score_table(),
            round_time: self.round_time,
            room_id: self.id.clone(),
        };

        self.send_to(client_id, &msg);
    }

    /// Unicast; failures are logged and dropped
    pub fn send_to(&self, client_id: ClientId, msg: &ServerMsg) {
        let Some(outbound) = self.clients.get(&client_id) else {
            return;
        };
        let Some(payload) = self.encode(msg) else {
            return;
        };

        if let Err(e) = outbound.send(payload) {
            warn!(
                room_id = %self.id,
                client_id = %client_id,
                error = %e,
                "Failed to send to client"
            );
        }
    }

    /// Fan out to every client except `exclude`. One failing recipient never
    /// affects the others.
    pub fn broadcast(&self, msg: &ServerMsg, exclude: Option<ClientId>) {
        let Some(payload) = self.encode(msg) else {
            return;
        };

        for (client_id, outbound) in &self.clients {
            if Some(*client_id) == exclude {
                continue;
            }
            if let Err(e) = outbound.send(payload.clone()) {
                warn!(
                    room_id = %self.id,
                    client_id = %client_id,
                    error = %e,
                    "Failed to broadcast to client"
                );
            }
        }
    }

    fn encode(&self, msg: &ServerMsg) -> Option<Arc<str>> {
        match serde_json::to_string(msg) {
            Ok(json) => Some(Arc::from(json)),
            Err(e) => {
                error!(room_id = %self.id, error = %e, "Failed to serialize message");
                None
            }
        }
    }
}
