//! Projectiles: trajectory, lifetime and hit testing

use std::collections::VecDeque;
use std::time::Duration;

use crate::util::time::frame_scale;
use crate::ws::protocol::{BulletSnapshot, ClientId, TrailPoint};

use super::environment::Environment;
use super::player::{Player, Shot};

/// Units travelled per baseline frame
pub const BULLET_SPEED: f32 = 8.0;

/// Damage per hit
pub const BULLET_DAMAGE: f32 = 10.0;

/// Wall-clock lifetime before a bullet expires
pub const BULLET_MAX_LIFETIME: Duration = Duration::from_millis(5000);

/// Positions kept for client interpolation
pub const TRAIL_CAPACITY: usize = 10;

/// Trail points included on the wire
pub const TRAIL_WIRE_POINTS: usize = 3;

/// Per-room bullet identifier
pub type BulletId = u64;

/// Active projectile in the room
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: BulletId,
    pub owner_id: ClientId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub damage: f32,
    pub active: bool,
    pub created_at: Duration,
    pub max_lifetime: Duration,
    trail: VecDeque<TrailPoint>,
}

impl Bullet {
    /// Create a bullet at the muzzle; velocity is fixed from the angle here
    pub fn new(
        id: BulletId,
        owner_id: ClientId,
        x: f32,
        y: f32,
        angle: f32,
        created_at: Duration,
    ) -> Self {
        let mut trail = VecDeque::with_capacity(TRAIL_CAPACITY);
        trail.push_back(TrailPoint { x, y });

        Self {
            id,
            owner_id,
            x,
            y,
            angle,
            vel_x: angle.cos() * BULLET_SPEED,
            vel_y: angle.sin() * BULLET_SPEED,
            damage: BULLET_DAMAGE,
            active: true,
            created_at,
            max_lifetime: BULLET_MAX_LIFETIME,
            trail,
        }
    }

    /// Build from a player's shot
    pub fn from_shot(id: BulletId, shot: &Shot, created_at: Duration) -> Self {
        let mut bullet = Self::new(id, shot.owner_id, shot.x, shot.y, shot.angle, created_at);
        bullet.damage = shot.damage;
        bullet
    }

    /// Advance by `elapsed_ms`; returns false (and deactivates) on impact,
    /// leaving the world, or expiry
    pub fn update(&mut self, environment: &Environment, elapsed_ms: f32, now: Duration) -> bool {
        if !self.active {
            return false;
        }

        let dt = frame_scale(elapsed_ms);
        let new_x = self.x + self.vel_x * dt;
        let new_y = self.y + self.vel_y * dt;

        if environment.check_gun_collision(new_x, new_y) {
            self.active = false;
            return false;
        }

        if new_x < 0.0
            || new_x > environment.world_width
            || new_y < 0.0
            || new_y > environment.world_height
        {
            self.active = false;
            return false;
        }

        if now.saturating_sub(self.created_at) > self.max_lifetime {
            self.active = false;
            return false;
        }

        self.x = new_x;
        self.y = new_y;

        self.trail.push_back(TrailPoint { x: new_x, y: new_y });
        if self.trail.len() > TRAIL_CAPACITY {
            self.trail.pop_front();
        }

        true
    }

    /// Point-in-box test against a live player other than the owner
    pub fn check_player_collision(&self, player: &Player) -> bool {
        if !self.active || player.is_dead || player.id == self.owner_id {
            return false;
        }

        self.x >= player.x
            && self.x <= player.x + player.width
            && self.y >= player.y
            && self.y <= player.y + player.height
    }

    pub fn destroy(&mut self) {
        self.active = false;
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    pub fn snapshot(&self) -> BulletSnapshot {
        let skip = self.trail.len().saturating_sub(TRAIL_WIRE_POINTS);
        BulletSnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            angle: self.angle,
            owner_id: self.owner_id,
            trail: self.trail.iter().skip(skip).copied().collect(),
            active: self.active,
        }
    }
}
