//! Damage events and delivery of resolved hits

use serde::{Deserialize, Serialize};

use super::hit::HitOutcome;
use super::EntityId;

/// Kind of damage carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageKind {
    /// Hitscan rounds
    Ballistic,
    /// Projectile impacts
    Explosive,
}

/// A single directed damage delivery. Only `amount > 0` has any effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub amount: f32,
    /// Combatant responsible for the damage
    pub instigator: EntityId,
    /// Weapon or projectile that dealt it
    pub causer: EntityId,
    pub kind: DamageKind,
    pub target: EntityId,
}

/// Anything that can route a damage event to the target's health.
/// Unknown targets (static geometry, removed entities) are ignored.
pub trait DamageReceiver {
    fn receive_damage(&mut self, event: DamageEvent);
}

/// Converts resolved hits into damage events
pub struct DamageApplier;

impl DamageApplier {
    /// Deliver `base_damage` to the actor of a blocking hit. Returns the
    /// event that was sent, or `None` for a miss.
    pub fn apply<R: DamageReceiver + ?Sized>(
        receiver: &mut R,
        hit: &HitOutcome,
        base_damage: f32,
        kind: DamageKind,
        instigator: EntityId,
        causer: EntityId,
    ) -> Option<DamageEvent> {
        let target = hit.actor()?;
        let event = DamageEvent {
            amount: base_damage,
            instigator,
            causer,
            kind,
            target,
        };
        receiver.receive_damage(event);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[derive(Default)]
    struct Inbox(Vec<DamageEvent>);

    impl DamageReceiver for Inbox {
        fn receive_damage(&mut self, event: DamageEvent) {
            self.0.push(event);
        }
    }

    #[test]
    fn test_hit_delivers_base_damage() {
        let mut inbox = Inbox::default();
        let hit = HitOutcome::Hit {
            actor: EntityId::from_u128(2),
            impact_point: Vec3::X,
            impact_normal: Vec3::NEG_X,
        };
        let event = DamageApplier::apply(
            &mut inbox,
            &hit,
            20.0,
            DamageKind::Ballistic,
            EntityId::from_u128(1),
            EntityId::from_u128(10),
        )
        .unwrap();

        assert_eq!(inbox.0, vec![event]);
        assert_eq!(event.target, EntityId::from_u128(2));
        assert_eq!(event.amount, 20.0);
        assert_eq!(event.causer, EntityId::from_u128(10));
    }

    #[test]
    fn test_miss_creates_no_event() {
        let mut inbox = Inbox::default();
        let miss = HitOutcome::NoHit { end_point: Vec3::ONE };
        let event = DamageApplier::apply(
            &mut inbox,
            &miss,
            20.0,
            DamageKind::Ballistic,
            EntityId::from_u128(1),
            EntityId::from_u128(10),
        );
        assert!(event.is_none());
        assert!(inbox.0.is_empty());
    }
}
