//! Terminal Alive -> Dying -> Dead transition of a combatant

use serde::{Deserialize, Serialize};

use crate::util::time::SimTime;

use super::scheduler::{Scheduler, TimerHandle};

/// Lifecycle of a combatant. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeState {
    Alive,
    /// Health hit zero; input is disabled and removal is pending
    Dying,
    /// Removal has run
    Dead,
}

#[derive(Debug, Clone)]
pub struct DeathCoordinator {
    state: LifeState,
    died_at: Option<SimTime>,
    removal: Option<TimerHandle>,
}

impl DeathCoordinator {
    pub fn new() -> Self {
        Self {
            state: LifeState::Alive,
            died_at: None,
            removal: None,
        }
    }

    pub fn state(&self) -> LifeState {
        self.state
    }

    pub fn accepts_input(&self) -> bool {
        self.state == LifeState::Alive
    }

    pub fn died_at(&self) -> Option<SimTime> {
        self.died_at
    }

    pub fn removal_handle(&self) -> Option<TimerHandle> {
        self.removal
    }

    /// Enter `Dying` and schedule `removal` after `grace` seconds.
    /// Returns false if the transition already happened.
    pub fn begin_dying<A: Clone>(
        &mut self,
        now: SimTime,
        grace: SimTime,
        scheduler: &mut Scheduler<A>,
        removal: A,
    ) -> bool {
        if self.state != LifeState::Alive {
            return false;
        }
        self.state = LifeState::Dying;
        self.died_at = Some(now);
        self.removal = Some(scheduler.schedule(now, grace, None, removal));
        true
    }

    /// Enter `Dead`. Only valid from `Dying`.
    pub fn complete_removal(&mut self) -> bool {
        if self.state != LifeState::Dying {
            return false;
        }
        self.state = LifeState::Dead;
        self.removal = None;
        true
    }

    /// Drop a pending removal timer, e.g. when the owner disconnects first
    pub fn abandon<A: Clone>(&mut self, scheduler: &mut Scheduler<A>) {
        if let Some(handle) = self.removal.take() {
            scheduler.cancel(handle);
        }
    }
}

impl Default for DeathCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut s = Scheduler::new();
        let mut death = DeathCoordinator::new();
        assert!(death.accepts_input());

        assert!(death.begin_dying(5.0, 10.0, &mut s, "remove"));
        assert_eq!(death.state(), LifeState::Dying);
        assert!(!death.accepts_input());
        assert_eq!(death.died_at(), Some(5.0));

        assert!(s.pop_due(14.9).is_none());
        assert_eq!(s.pop_due(15.0).map(|(_, a)| a), Some("remove"));
        assert!(death.complete_removal());
        assert_eq!(death.state(), LifeState::Dead);
    }

    #[test]
    fn test_dying_is_entered_once() {
        let mut s = Scheduler::new();
        let mut death = DeathCoordinator::new();
        assert!(death.begin_dying(0.0, 1.0, &mut s, ()));
        assert!(!death.begin_dying(0.5, 1.0, &mut s, ()));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_no_skipping_or_reentry() {
        let mut s = Scheduler::new();
        let mut death = DeathCoordinator::new();
        assert!(!death.complete_removal());
        assert_eq!(death.state(), LifeState::Alive);

        death.begin_dying(0.0, 1.0, &mut s, ());
        assert!(death.complete_removal());
        assert!(!death.complete_removal());
        assert!(!death.begin_dying(2.0, 1.0, &mut s, ()));
        assert_eq!(death.state(), LifeState::Dead);
    }

    #[test]
    fn test_abandon_cancels_removal() {
        let mut s = Scheduler::new();
        let mut death = DeathCoordinator::new();
        death.begin_dying(0.0, 1.0, &mut s, ());
        death.abandon(&mut s);
        assert!(s.is_empty());
        assert!(death.removal_handle().is_none());
    }
}
