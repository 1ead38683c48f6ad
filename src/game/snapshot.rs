//! Network update throttling and tick performance tracking

use std::collections::VecDeque;
use std::time::Duration;

use crate::util::time::unix_millis;
use crate::ws::protocol::{BulletSnapshot, PlayerSnapshot, ServerMsg};

/// Tick budget at 60 Hz
pub const TICK_BUDGET: Duration = Duration::from_micros(16_670);

/// Ticks kept in the rolling performance window
pub const PERF_WINDOW: usize = 60;

/// Builds throttled GAME_STATE messages at a fixed rate below the tick rate
#[derive(Debug)]
pub struct SnapshotBuilder {
    /// Minimum spacing between broadcasts
    interval: Duration,
    /// Half a tick; ticks land on truncated periods, so two 16_666 µs ticks
    /// must still count as one 33_333 µs broadcast interval
    slack: Duration,
    /// When the last broadcast went out
    last_sent: Option<Duration>,
}

impl SnapshotBuilder {
    pub fn new(interval: Duration, tick_period: Duration) -> Self {
        Self {
            interval,
            slack: tick_period / 2,
            last_sent: None,
        }
    }

    /// Check if it's time to send a network update
    pub fn should_send(&self, now: Duration) -> bool {
        match self.last_sent {
            Some(last) => now.saturating_sub(last) + self.slack >= self.interval,
            None => true,
        }
    }

    /// Record that the update window was used (whether or not anything was sent)
    pub fn mark_sent(&mut self, now: Duration) {
        self.last_sent = Some(now);
    }

    /// Build a GAME_STATE message, or None when there is nothing to report
    pub fn build(
        &self,
        players: Vec<PlayerSnapshot>,
        bullets: Vec<BulletSnapshot>,
    ) -> Option<ServerMsg> {
        if players.is_empty() && bullets.is_empty() {
            return None;
        }

        Some(ServerMsg::GameState {
            players,
            bullets,
            timestamp: unix_millis(),
        })
    }
}

/// Rolling window of tick durations
#[derive(Debug, Default)]
pub struct TickStats {
    samples: VecDeque<Duration>,
    max: Duration,
}

impl TickStats {
    /// Record one tick; returns true if it blew the budget
    pub fn record(&mut self, tick_time: Duration) -> bool {
        self.samples.push_back(tick_time);
        if self.samples.len() > PERF_WINDOW {
            self.samples.pop_front();
        }
        self.max = self.max.max(tick_time);

        tick_time > TICK_BUDGET
    }

    /// Worst tick seen since the room started
    pub fn max_ms(&self) -> f32 {
        self.max.as_secs_f32() * 1000.0
    }

    /// Average over the window
    pub fn avg_ms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f32() * 1000.0 / self.samples.len() as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
