//! Logical clock and cancellable timers for a single room
//!
//! Every delayed effect in a room (tick loop, round countdown, reloads, jetpack
//! regen, respawns, round restart) is a timer owned by the room's `Scheduler`.
//! The room advances the clock explicitly, so a runtime driver can feed it wall
//! time while tests feed it simulated time.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::ws::protocol::ClientId;

/// Handle returned when scheduling; used to cancel or to recognise a firing
pub type TimerId = u64;

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Simulation step
    Tick,
    /// 1 Hz round countdown
    RoundCountdown,
    /// Restart after the end-of-round pause
    RoundRestart,
    ReloadComplete(ClientId),
    JetpackRegen(ClientId),
    Respawn(ClientId),
}

impl TimerEvent {
    /// Player this timer targets, if any
    pub fn player(&self) -> Option<ClientId> {
        match self {
            TimerEvent::ReloadComplete(id)
            | TimerEvent::JetpackRegen(id)
            | TimerEvent::Respawn(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Timer {
    due: Duration,
    period: Option<Duration>,
    event: TimerEvent,
}

/// Timer queue driven by an explicitly advanced clock
#[derive(Debug, Default)]
pub struct Scheduler {
    now: Duration,
    next_id: TimerId,
    timers: BTreeMap<TimerId, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Fire `event` once after `delay`
    pub fn schedule_once(&mut self, delay: Duration, event: TimerEvent) -> TimerId {
        self.insert(delay, None, event)
    }

    /// Fire `event` after `first`, then every `period` until cancelled
    pub fn schedule_repeating(
        &mut self,
        first: Duration,
        period: Duration,
        event: TimerEvent,
    ) -> TimerId {
        // A zero period would refire forever inside one advance.
        let period = period.max(Duration::from_millis(1));
        self.insert(first, Some(period), event)
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>, event: TimerEvent) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            Timer {
                due: self.now + delay,
                period,
                event,
            },
        );
        id
    }

    /// Cancel a timer; returns false if it already fired or never existed
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Cancel every timer whose event matches
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&TimerEvent) -> bool) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, timer| !predicate(&timer.event));
        before - self.timers.len()
    }

    /// Cancel everything (room teardown)
    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Earliest due time among pending timers
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.values().map(|t| t.due).min()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to its
    /// due time. Repeating timers are re-armed under the same id. Ties fire in
    /// scheduling order.
    pub fn pop_due(&mut self, until: Duration) -> Option<(TimerId, TimerEvent)> {
        let (id, due) = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(id, t)| (t.due, **id))
            .map(|(id, t)| (*id, t.due))?;

        self.now = self.now.max(due);

        let timer = self.timers.get_mut(&id)?;
        let event = timer.event;
        let period = timer.period;
        if let Some(period) = period {
            timer.due += period;
        } else {
            self.timers.remove(&id);
        }

        Some((id, event))
    }

    /// Move the clock forward without firing anything (call after draining `pop_due`)
    pub fn set_now(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn drain(s: &mut Scheduler, until: Duration) -> Vec<(Duration, TimerEvent)> {
        let mut fired = Vec::new();
        while let Some((_, event)) = s.pop_due(until) {
            fired.push((s.now(), event));
        }
        s.set_now(until);
        fired
    }

    #[test]
    fn one_shot_fires_once_at_due_time() {
        let mut s = Scheduler::new();
        s.schedule_once(ms(100), TimerEvent::RoundRestart);

        assert!(drain(&mut s, ms(99)).is_empty());
        assert_eq!(drain(&mut s, ms(150)), vec![(ms(100), TimerEvent::RoundRestart)]);
        assert!(drain(&mut s, ms(1_000)).is_empty());
        assert_eq!(s.now(), ms(1_000));
    }

    #[test]
    fn repeating_timer_fires_every_period_until_cancelled() {
        let mut s = Scheduler::new();
        let id = s.schedule_repeating(ms(10), ms(10), TimerEvent::Tick);

        assert_eq!(drain(&mut s, ms(35)).len(), 3);
        assert!(s.cancel(id));
        assert!(drain(&mut s, ms(100)).is_empty());
        assert!(!s.cancel(id));
    }

    #[test]
    fn timers_fire_in_due_then_creation_order() {
        let mut s = Scheduler::new();
        let a = ClientId::from_u128(1);
        s.schedule_once(ms(20), TimerEvent::Respawn(a));
        s.schedule_once(ms(10), TimerEvent::ReloadComplete(a));
        s.schedule_once(ms(20), TimerEvent::RoundRestart);

        let events: Vec<_> = drain(&mut s, ms(50)).into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            events,
            vec![
                TimerEvent::ReloadComplete(a),
                TimerEvent::Respawn(a),
                TimerEvent::RoundRestart
            ]
        );
    }

    #[test]
    fn timers_scheduled_while_draining_fire_in_same_advance() {
        let mut s = Scheduler::new();
        s.schedule_once(ms(10), TimerEvent::RoundRestart);

        let mut fired = Vec::new();
        while let Some((_, event)) = s.pop_due(ms(100)) {
            fired.push(event);
            if event == TimerEvent::RoundRestart {
                s.schedule_once(ms(5), TimerEvent::RoundCountdown);
            }
        }
        assert_eq!(fired, vec![TimerEvent::RoundRestart, TimerEvent::RoundCountdown]);
        assert_eq!(s.now(), ms(15));
    }

    #[test]
    fn cancel_where_scopes_to_player() {
        let mut s = Scheduler::new();
        let a = ClientId::from_u128(1);
        let b = ClientId::from_u128(2);
        s.schedule_once(ms(10), TimerEvent::Respawn(a));
        s.schedule_repeating(ms(10), ms(16), TimerEvent::JetpackRegen(a));
        s.schedule_once(ms(10), TimerEvent::Respawn(b));
        s.schedule_repeating(ms(16), ms(16), TimerEvent::Tick);

        assert_eq!(s.cancel_where(|e| e.player() == Some(a)), 2);
        assert_eq!(s.pending(), 2);
        assert_eq!(s.next_deadline(), Some(ms(10)));

        s.cancel_all();
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut s = Scheduler::new();
        s.set_now(ms(50));
        s.set_now(ms(20));
        assert_eq!(s.now(), ms(50));
    }
}
