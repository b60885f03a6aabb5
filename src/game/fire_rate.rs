//! Minimum spacing between shots, backed by a repeating timer

use crate::util::time::SimTime;

use super::scheduler::{Scheduler, TimerHandle};

/// Supported cadence range. Rates outside it are clamped.
pub const MIN_ROUNDS_PER_MINUTE: f32 = 1.0;
pub const MAX_ROUNDS_PER_MINUTE: f32 = 6000.0;

/// Seconds between shots for a rate given in rounds per minute
pub fn interval_from_rpm(rounds_per_minute: f32) -> SimTime {
    let rpm = if rounds_per_minute.is_nan() {
        MIN_ROUNDS_PER_MINUTE
    } else {
        rounds_per_minute.clamp(MIN_ROUNDS_PER_MINUTE, MAX_ROUNDS_PER_MINUTE)
    };
    60.0 / SimTime::from(rpm)
}

/// Owns the repeating fire timer of one weapon.
#[derive(Debug, Clone)]
pub struct FireRateController {
    interval: SimTime,
    last_fired: Option<SimTime>,
    timer: Option<TimerHandle>,
}

impl FireRateController {
    pub fn new(interval: SimTime) -> Self {
        Self {
            interval,
            last_fired: None,
            timer: None,
        }
    }

    pub fn from_rounds_per_minute(rounds_per_minute: f32) -> Self {
        Self::new(interval_from_rpm(rounds_per_minute))
    }

    pub fn interval(&self) -> SimTime {
        self.interval
    }

    pub fn last_fired(&self) -> Option<SimTime> {
        self.last_fired
    }

    /// Time left before the next shot may go out
    pub fn cooldown_remaining(&self, now: SimTime) -> SimTime {
        self.last_fired
            .map(|last| (last + self.interval - now).max(0.0))
            .unwrap_or(0.0)
    }

    pub fn is_active<A: Clone>(&self, scheduler: &Scheduler<A>) -> bool {
        self.timer.is_some_and(|h| scheduler.is_scheduled(h))
    }

    /// Start repeating `action` every interval, first after the remaining
    /// cooldown. A no-op while a timer is already running.
    pub fn request_fire<A: Clone>(
        &mut self,
        now: SimTime,
        scheduler: &mut Scheduler<A>,
        action: A,
    ) -> bool {
        if self.is_active(scheduler) {
            return false;
        }
        let delay = self.cooldown_remaining(now);
        self.timer = Some(scheduler.schedule(now, delay, Some(self.interval), action));
        true
    }

    pub fn cancel<A: Clone>(&mut self, scheduler: &mut Scheduler<A>) {
        if let Some(handle) = self.timer.take() {
            scheduler.cancel(handle);
        }
    }

    pub fn record_shot(&mut self, now: SimTime) {
        self.last_fired = Some(now);
    }
}
