//! Static world geometry and collision predicates

use rand::Rng;

use crate::ws::protocol::{EnvironmentSnapshot, Obstacle};

/// Camera viewport dimensions clients render at
pub const BASE_WIDTH: f32 = 1280.0;
pub const BASE_HEIGHT: f32 = 720.0;

/// Playable world, three viewport-heights wide
pub const WORLD_WIDTH: f32 = 720.0 * 3.0;
pub const WORLD_HEIGHT: f32 = 720.0;

/// Top of the ground plane
pub const GROUND_LEVEL: f32 = BASE_HEIGHT - 100.0;

/// Random candidates tried before falling back to fixed anchors
pub const SPAWN_ATTEMPTS: usize = 50;

/// Box used for spawn clearance (standing player)
const SPAWN_WIDTH: f32 = 50.0;
const SPAWN_HEIGHT: f32 = 70.0;

/// Used when every candidate and anchor is blocked
pub const LAST_RESORT_SPAWN: SpawnPoint = SpawnPoint { x: 100.0, y: 100.0 };

/// A top-left spawn coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub x: f32,
    pub y: f32,
}

/// Immutable per-room world
#[derive(Debug, Clone)]
pub struct Environment {
    pub base_width: f32,
    pub base_height: f32,
    pub world_width: f32,
    pub world_height: f32,
    pub ground_level: f32,
    obstacles: Vec<Obstacle>,
}

impl Default for Environment {
    fn default() -> Self {
        let platform = |x: f32, from_bottom: f32| Obstacle {
            x,
            y: BASE_HEIGHT - from_bottom,
            width: 100.0,
            height: 50.0,
        };

        Self::with_obstacles(vec![
            // Left section
            platform(200.0, 150.0),
            platform(100.0, 300.0),
            // Center section
            platform(700.0, 150.0),
            platform(600.0, 300.0),
            platform(900.0, 400.0),
            // Right section
            platform(1400.0, 200.0),
            platform(1600.0, 350.0),
            platform(1800.0, 250.0),
        ])
    }
}

impl Environment {
    /// Standard world dimensions with a custom obstacle layout
    pub fn with_obstacles(obstacles: Vec<Obstacle>) -> Self {
        Self {
            base_width: BASE_WIDTH,
            base_height: BASE_HEIGHT,
            world_width: WORLD_WIDTH,
            world_height: WORLD_HEIGHT,
            ground_level: GROUND_LEVEL,
            obstacles,
        }
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Point test used for bullets: inside any obstacle (edges inclusive) or at/below ground
    pub fn check_gun_collision(&self, x: f32, y: f32) -> bool {
        let hits_obstacle = self.obstacles.iter().any(|obs| {
            x >= obs.x && x <= obs.x + obs.width && y >= obs.y && y <= obs.y + obs.height
        });

        hits_obstacle || y >= self.ground_level
    }

    /// Would the box collide after moving `delta_x` horizontally?
    pub fn check_collision_on_x(
        &self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        delta_x: f32,
    ) -> bool {
        let new_x = x + delta_x;
        if self.check_area_collision(new_x, y, width, height) {
            return true;
        }

        new_x < 0.0 || new_x + width > self.world_width
    }

    /// Would the box collide after moving `delta_y` vertically?
    pub fn check_collision_on_y(
        &self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        delta_y: f32,
    ) -> bool {
        let new_y = y + delta_y;
        if self.check_area_collision(x, new_y, width, height) {
            return true;
        }

        new_y < 0.0 || new_y + height > self.world_height
    }

    /// Strict overlap between the box and any obstacle (touching edges do not count)
    pub fn check_area_collision(&self, x: f32, y: f32, width: f32, height: f32) -> bool {
        self.obstacles.iter().any(|obs| {
            x < obs.x + obs.width
                && x + width > obs.x
                && y < obs.y + obs.height
                && y + height > obs.y
        })
    }

    /// Fixed positions tried once random sampling is exhausted
    pub fn fallback_spawns(&self) -> [SpawnPoint; 3] {
        [
            SpawnPoint { x: 100.0, y: 100.0 },
            SpawnPoint {
                x: self.world_width - 150.0,
                y: 100.0,
            },
            SpawnPoint {
                x: self.world_width / 2.0 - 25.0,
                y: 100.0,
            },
        ]
    }

    /// Pick an obstacle-free spawn by rejection sampling in the walkable band.
    /// Always returns a finite point.
    pub fn safe_spawn_position<R: Rng + ?Sized>(&self, rng: &mut R) -> SpawnPoint {
        let max_x = (self.world_width - SPAWN_WIDTH).max(1.0);
        let band = (self.ground_level - SPAWN_HEIGHT - 100.0).max(1.0);

        for _ in 0..SPAWN_ATTEMPTS {
            let x = rng.gen::<f32>() * max_x;
            let y = rng.gen::<f32>() * band + 50.0;

            if !self.check_area_collision(x, y, SPAWN_WIDTH, SPAWN_HEIGHT) {
                return SpawnPoint { x, y };
            }
        }

        self.fallback_spawns()
            .into_iter()
            .find(|p| !self.check_area_collision(p.x, p.y, SPAWN_WIDTH, SPAWN_HEIGHT))
            .unwrap_or(LAST_RESORT_SPAWN)
    }

    /// Snapshot for INITIAL_GAME_STATE
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            base_width: self.base_width,
            base_height: self.base_height,
            world_width: self.world_width,
            world_height: self.world_height,
            ground_level: self.ground_level,
            obstacles: self.obstacles.clone(),
        }
    }
}
