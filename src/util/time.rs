//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // 60 ticks per second
pub const NETWORK_UPDATE_TPS: u32 = 30; // 30 GAME_STATE broadcasts per second

/// Frame length all per-tick constants (speeds, gravity, drain) are tuned against
pub const BASELINE_FRAME_MS: f32 = 16.67;

/// Period between events fired `rate` times per second
pub fn period_for_rate(rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / rate.max(1) as u64)
}

/// Convert elapsed milliseconds into baseline frames (1.0 == one 60 Hz frame)
pub fn frame_scale(elapsed_ms: f32) -> f32 {
    elapsed_ms / BASELINE_FRAME_MS
}

/// Milliseconds as a float, for physics step sizes
pub fn as_millis_f32(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1000.0
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
