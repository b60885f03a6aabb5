//! Cancellable one-shot and repeating timers for the simulation loop

use std::collections::BTreeMap;

use crate::util::time::SimTime;

/// Handle returned by [`Scheduler::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone)]
struct Timer<A> {
    due: SimTime,
    period: Option<SimTime>,
    action: A,
}

/// Cooperative timer queue.
///
/// Actions are plain data rather than closures: the owner pops due actions
/// with [`Scheduler::pop_due`] and dispatches them one at a time, so an
/// action may cancel any other timer (including its own) before that timer
/// is handed out.
#[derive(Debug)]
pub struct Scheduler<A> {
    next_id: u64,
    timers: BTreeMap<TimerHandle, Timer<A>>,
}

impl<A: Clone> Scheduler<A> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            timers: BTreeMap::new(),
        }
    }

    /// Schedule `action` to run `delay` seconds after `now`, then every
    /// `period` seconds if one is given. Non-positive periods make the timer
    /// one-shot.
    pub fn schedule(
        &mut self,
        now: SimTime,
        delay: SimTime,
        period: Option<SimTime>,
        action: A,
    ) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.timers.insert(
            handle,
            Timer {
                due: now + delay.max(0.0),
                period: period.filter(|p| p.is_finite() && *p > 0.0),
                action,
            },
        );
        handle
    }

    /// Stop a timer. Returns false if it was not scheduled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle).is_some()
    }

    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    /// Next due time of a scheduled timer
    pub fn due_at(&self, handle: TimerHandle) -> Option<SimTime> {
        self.timers.get(&handle).map(|t| t.due)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Pop the earliest timer due at or before `now`.
    ///
    /// Repeating timers are re-armed at `due + period`; if the loop fell a
    /// whole period behind, missed periods are skipped and the timer re-arms
    /// at `now + period`. Each timer is therefore handed out at most once per
    /// `now`.
    pub fn pop_due(&mut self, now: SimTime) -> Option<(TimerHandle, A)> {
        let handle = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= now)
            .min_by(|a, b| a.1.due.total_cmp(&b.1.due).then(a.0.cmp(b.0)))
            .map(|(h, _)| *h)?;

        let timer = self.timers.get_mut(&handle)?;
        let action = timer.action.clone();
        match timer.period {
            Some(period) => {
                let next = timer.due + period;
                timer.due = if next <= now { now + period } else { next };
            }
            None => {
                self.timers.remove(&handle);
            }
        }
        Some((handle, action))
    }
}

impl<A: Clone> Default for Scheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}
