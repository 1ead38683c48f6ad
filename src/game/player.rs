//! Authoritative player kinematics and combat resources
//!
//! Clients only ever send intent (held keys, aim, shoot/jump/reload). Position is
//! derived here from the last input snapshot and elapsed time on each tick.

use std::time::Duration;

use rand::Rng;

use crate::util::time::frame_scale;
use crate::ws::protocol::{ClientId, MoveKeys, PlayerSnapshot};

use super::bullet::BULLET_DAMAGE;
use super::environment::{Environment, SpawnPoint};
use super::scheduler::{Scheduler, TimerEvent, TimerId};

// Box
pub const PLAYER_WIDTH: f32 = 50.0;
pub const PLAYER_HEIGHT: f32 = 70.0;
pub const CROUCH_HEIGHT: f32 = 50.0;

// Movement, per baseline frame
pub const MOVE_SPEED: f32 = 5.0;
pub const GRAVITY: f32 = 0.8;
pub const JUMP_IMPULSE: f32 = -10.0;

// Jetpack, per tick
pub const JETPACK_THRUST: f32 = 0.4;
pub const JETPACK_MAX_RISE: f32 = -4.5;
pub const JETPACK_DRAIN: f32 = 0.4;
pub const JETPACK_REGEN_DELAY: Duration = Duration::from_millis(8);
pub const JETPACK_REGEN_INTERVAL: Duration = Duration::from_millis(16);
pub const JETPACK_REGEN_STEP: f32 = 0.5;

// Resources
pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_FUEL: f32 = 100.0;
pub const MAX_AMMO: u32 = 25;
pub const RELOAD_TIME: Duration = Duration::from_millis(4000);

// Gun
pub const MIN_SHOT_INTERVAL: Duration = Duration::from_millis(100);
pub const MUZZLE_OFFSET: f32 = 30.0;
pub const SHOT_SPREAD: f32 = 0.05;

/// Minimum spacing between state diffs for one player
pub const STATE_SEND_INTERVAL: Duration = Duration::from_millis(16);

/// A successful shot, turned into a bullet by the room
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub owner_id: ClientId,
    pub damage: f32,
}

/// Player state in a room (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: ClientId,
    pub name: String,

    // Position and box (top-left anchored)
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub on_ground: bool,

    // Status
    pub health: f32,
    pub is_dead: bool,
    pub is_crouching: bool,

    // Jetpack
    pub jetpack_fuel: f32,
    pub is_using_jetpack: bool,

    // Gun
    pub gun_angle: f32,
    pub ammo: u32,
    pub is_reloading: bool,
    last_shot: Option<Duration>,

    // Input tracking
    keys: MoveKeys,

    // Network diff
    state_changed: bool,
    last_state_update: Option<Duration>,

    // Timers this player is waiting on
    reload_timer: Option<TimerId>,
    regen_timer: Option<TimerId>,
}

impl Player {
    pub fn new(id: ClientId, name: String, spawn: SpawnPoint) -> Self {
        Self {
            id,
            name,
            x: spawn.x,
            y: spawn.y,
            width: PLAYER_WIDTH,
            height: PLAYER_HEIGHT,
            vel_x: 0.0,
            vel_y: 0.0,
            on_ground: false,
            health: MAX_HEALTH,
            is_dead: false,
            is_crouching: false,
            jetpack_fuel: MAX_FUEL,
            is_using_jetpack: false,
            gun_angle: 0.0,
            ammo: MAX_AMMO,
            is_reloading: false,
            last_shot: None,
            keys: MoveKeys::default(),
            state_changed: true,
            last_state_update: None,
            reload_timer: None,
            regen_timer: None,
        }
    }

    pub fn keys(&self) -> MoveKeys {
        self.keys
    }

    /// Store the latest input; applied on the next tick
    pub fn update_input(&mut self, keys: MoveKeys, gun_angle: f32) {
        self.keys = keys;
        if gun_angle.is_finite() {
            self.gun_angle = gun_angle;
        }
        self.state_changed = true;
    }

    /// Advance one tick of `elapsed_ms`
    pub fn update(
        &mut self,
        environment: &Environment,
        elapsed_ms: f32,
        scheduler: &mut Scheduler,
    ) {
        if self.is_dead {
            return;
        }

        let dt = frame_scale(elapsed_ms);

        // Horizontal speed comes straight from the held keys each tick.
        self.vel_x = 0.0;
        if self.keys.left {
            self.vel_x = -MOVE_SPEED;
        }
        if self.keys.right {
            self.vel_x = MOVE_SPEED;
        }

        if self.keys.up && self.jetpack_fuel > 0.0 {
            self.is_using_jetpack = true;
            self.vel_y = (self.vel_y - JETPACK_THRUST).max(JETPACK_MAX_RISE);
            self.jetpack_fuel = (self.jetpack_fuel - JETPACK_DRAIN).max(0.0);
            self.restart_jetpack_regen(scheduler);
        } else {
            self.is_using_jetpack = false;
            self.vel_y += GRAVITY * dt;
        }

        // Resize around the feet so crouching doesn't lift the player off the floor.
        self.is_crouching = self.keys.crouch;
        let height = if self.is_crouching {
            CROUCH_HEIGHT
        } else {
            PLAYER_HEIGHT
        };
        self.y = (self.y + self.height - height).max(0.0);
        self.height = height;

        let landed = self.move_axes(environment, dt);
        self.settle_on_ground(environment, landed);

        if self.health <= 0.0 && !self.is_dead {
            self.is_dead = true;
            self.state_changed = true;
        }

        if self.vel_x != 0.0 || self.vel_y != 0.0 {
            self.state_changed = true;
        }
    }

    /// Move X then Y, each checked on its own. Returns true if a downward move was blocked.
    fn move_axes(&mut self, environment: &Environment, dt: f32) -> bool {
        let dx = self.vel_x * dt;
        if environment.check_collision_on_x(self.x, self.y, self.width, self.height, dx) {
            self.vel_x = 0.0;
        } else {
            self.x = (self.x + dx).clamp(0.0, environment.world_width - self.width);
        }

        let dy = self.vel_y * dt;
        if environment.check_collision_on_y(self.x, self.y, self.width, self.height, dy) {
            let landed = self.vel_y > 0.0;
            self.vel_y = 0.0;
            landed
        } else {
            self.y = (self.y + dy).clamp(0.0, environment.world_height - self.height);
            false
        }
    }

    /// The box never ends a tick below the ground plane.
    fn settle_on_ground(&mut self, environment: &Environment, landed: bool) {
        if self.y + self.height >= environment.ground_level {
            self.y = environment.ground_level - self.height;
            self.vel_y = 0.0;
            self.on_ground = true;
        } else {
            self.on_ground = landed;
        }
    }

    fn restart_jetpack_regen(&mut self, scheduler: &mut Scheduler) {
        if let Some(timer) = self.regen_timer.take() {
            scheduler.cancel(timer);
        }
        // First step lands one interval after the delay, by which point the
        // next tick has had a chance to clear `is_using_jetpack`.
        self.regen_timer = Some(scheduler.schedule_repeating(
            JETPACK_REGEN_DELAY + JETPACK_REGEN_INTERVAL,
            JETPACK_REGEN_INTERVAL,
            TimerEvent::JetpackRegen(self.id),
        ));
    }

    /// One regen step; stops itself once full or when the jetpack is in use
    pub fn regen_jetpack(&mut self, timer: TimerId, scheduler: &mut Scheduler) {
        if self.regen_timer != Some(timer) {
            scheduler.cancel(timer);
            return;
        }

        if self.jetpack_fuel < MAX_FUEL && !self.is_using_jetpack {
            self.jetpack_fuel = (self.jetpack_fuel + JETPACK_REGEN_STEP).min(MAX_FUEL);
            self.state_changed = true;
        } else {
            scheduler.cancel(timer);
            self.regen_timer = None;
        }
    }

    /// Upward impulse, only from a standing position
    pub fn jump(&mut self) -> bool {
        if !self.on_ground || self.is_dead {
            return false;
        }

        self.vel_y = JUMP_IMPULSE;
        self.on_ground = false;
        self.state_changed = true;
        true
    }

    /// Fire if alive, loaded and off cooldown
    pub fn shoot<R: Rng + ?Sized>(
        &mut self,
        scheduler: &mut Scheduler,
        rng: &mut R,
    ) -> Option<Shot> {
        if self.is_dead || self.is_reloading || self.ammo == 0 {
            return None;
        }

        let now = scheduler.now();
        if let Some(last) = self.last_shot {
            if now.saturating_sub(last) < MIN_SHOT_INTERVAL {
                return None;
            }
        }

        self.ammo -= 1;
        self.last_shot = Some(now);
        self.state_changed = true;

        if self.ammo == 0 {
            self.reload(scheduler);
        }

        let spread = rng.gen_range(-SHOT_SPREAD..SHOT_SPREAD);
        let angle = self.gun_angle + spread;

        let center_x = self.x + self.width / 2.0;
        let center_y = self.y + self.height / 2.0;

        Some(Shot {
            x: center_x + angle.cos() * MUZZLE_OFFSET,
            y: center_y + angle.sin() * MUZZLE_OFFSET,
            angle,
            owner_id: self.id,
            damage: BULLET_DAMAGE,
        })
    }

    /// Start a reload unless one is pending or the magazine is full
    pub fn reload(&mut self, scheduler: &mut Scheduler) -> bool {
        if self.is_reloading || self.ammo == MAX_AMMO {
            return false;
        }

        self.is_reloading = true;
        self.state_changed = true;
        self.reload_timer = Some(
            scheduler.schedule_once(RELOAD_TIME, TimerEvent::ReloadComplete(self.id)),
        );
        true
    }

    /// Reload timer fired; ignored unless it is the one this player is waiting on
    pub fn finish_reload(&mut self, timer: TimerId) -> bool {
        if self.reload_timer != Some(timer) {
            return false;
        }

        self.reload_timer = None;
        self.ammo = MAX_AMMO;
        self.is_reloading = false;
        self.state_changed = true;
        true
    }

    /// Apply damage; returns whether it had any effect
    pub fn take_damage(&mut self, amount: f32) -> bool {
        if self.is_dead {
            return false;
        }

        self.health = (self.health - amount).clamp(0.0, MAX_HEALTH);
        self.state_changed = true;

        if self.health == 0.0 {
            self.is_dead = true;
        }

        true
    }

    /// Back to full resources at `spawn`; pending reload/regen timers are dropped
    pub fn respawn(&mut self, spawn: SpawnPoint, scheduler: &mut Scheduler) {
        if let Some(timer) = self.reload_timer.take() {
            scheduler.cancel(timer);
        }
        if let Some(timer) = self.regen_timer.take() {
            scheduler.cancel(timer);
        }

        self.is_dead = false;
        self.health = MAX_HEALTH;
        self.x = spawn.x;
        self.y = spawn.y;
        self.vel_x = 0.0;
        self.vel_y = 0.0;
        self.on_ground = false;
        self.ammo = MAX_AMMO;
        self.is_reloading = false;
        self.jetpack_fuel = MAX_FUEL;
        self.is_using_jetpack = false;
        self.state_changed = true;
    }

    /// True at most once per send interval, and only when something changed.
    /// Accepting clears the dirty flag.
    pub fn should_send_update(&mut self, now: Duration) -> bool {
        if !self.state_changed {
            return false;
        }

        if let Some(last) = self.last_state_update {
            if now.saturating_sub(last) < STATE_SEND_INTERVAL {
                return false;
            }
        }

        self.last_state_update = Some(now);
        self.state_changed = false;
        true
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            velocity_x: self.vel_x,
            velocity_y: self.vel_y,
            health: self.health,
            is_dead: self.is_dead,
            is_crouching: self.is_crouching,
            is_using_jetpack: self.is_using_jetpack,
            gun_angle: self.gun_angle,
            ammo: self.ammo,
            is_reloading: self.is_reloading,
            jetpack_fuel: self.jetpack_fuel,
            on_ground: self.on_ground,
        }
    }
}
