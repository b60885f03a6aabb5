//! Authoritative health of one combatant

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::damage::{DamageEvent, DamageKind};
use super::EntityId;

/// Broadcast to observers after every effective damage event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthChanged {
    pub new_health: f32,
    pub delta: f32,
    pub instigator: EntityId,
    pub causer: EntityId,
    pub damage_kind: DamageKind,
}

/// Result of applying an effective damage event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    pub notification: HealthChanged,
    /// True only for the event that took health to zero
    pub died_now: bool,
}

/// Registration id of a health observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

pub type HealthObserver = Box<dyn FnMut(&HealthChanged) + Send>;

/// Current/maximum health plus the one-shot death latch.
///
/// Observers run synchronously in registration order, once per effective
/// damage event, in the order events are applied.
pub struct HealthState {
    owner: EntityId,
    current: f32,
    max: f32,
    died: bool,
    next_observer: u32,
    observers: Vec<(ObserverId, HealthObserver)>,
}

impl HealthState {
    pub fn new(owner: EntityId, max_health: f32) -> Self {
        let max = if max_health.is_finite() { max_health.max(0.0) } else { 0.0 };
        Self {
            owner,
            current: max,
            max,
            died: false,
            next_observer: 0,
            observers: Vec::new(),
        }
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn died(&self) -> bool {
        self.died
    }

    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&HealthChanged) + Send + 'static,
    {
        self.next_observer += 1;
        let id = ObserverId(self.next_observer);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Apply one damage event. Zero, negative and NaN amounts, and events
    /// addressed to another entity, change nothing and notify no one.
    pub fn apply_damage(&mut self, event: &DamageEvent) -> Option<DamageOutcome> {
        if !(event.amount > 0.0) {
            return None;
        }
        if event.target != self.owner {
            warn!(owner = %self.owner, target = %event.target, "Damage routed to wrong health record");
            return None;
        }

        let was_alive = self.current > 0.0;
        self.current = (self.current - event.amount).clamp(0.0, self.max);

        let died_now = was_alive && self.current == 0.0 && !self.died;
        if died_now {
            self.died = true;
        }

        let notification = HealthChanged {
            new_health: self.current,
            delta: event.amount,
            instigator: event.instigator,
            causer: event.causer,
            damage_kind: event.kind,
        };
        for (_, observer) in self.observers.iter_mut() {
            observer(&notification);
        }

        Some(DamageOutcome {
            notification,
            died_now,
        })
    }
}

impl fmt::Debug for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthState")
            .field("owner", &self.owner)
            .field("current", &self.current)
            .field("max", &self.max)
            .field("died", &self.died)
            .field("observers", &self.observers.len())
            .finish()
    }
}
