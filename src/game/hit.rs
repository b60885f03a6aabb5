//! Hit resolution against a ray-cast collaborator

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::EntityId;

/// Result of a trace. The endpoint of either variant is the single source
/// of truth for both damage and cosmetic replication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HitOutcome {
    /// First blocking obstacle along the ray
    Hit {
        actor: EntityId,
        impact_point: Vec3,
        impact_normal: Vec3,
    },
    /// Nothing within range; `end_point = origin + direction * max_range`
    NoHit { end_point: Vec3 },
}

impl HitOutcome {
    pub fn endpoint(&self) -> Vec3 {
        match self {
            HitOutcome::Hit { impact_point, .. } => *impact_point,
            HitOutcome::NoHit { end_point } => *end_point,
        }
    }

    pub fn actor(&self) -> Option<EntityId> {
        match self {
            HitOutcome::Hit { actor, .. } => Some(*actor),
            HitOutcome::NoHit { .. } => None,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, HitOutcome::Hit { .. })
    }
}

/// World ray-cast primitive. Implementations receive a unit direction and
/// a positive, finite range.
pub trait RayCaster {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_range: f32,
        ignore: &[EntityId],
    ) -> HitOutcome;
}

/// Resolve the first blocking hit along `direction` up to `max_range`.
///
/// Degenerate input (zero direction, non-positive or non-finite range)
/// resolves to a miss at the origin.
pub fn resolve<C: RayCaster + ?Sized>(
    caster: &C,
    origin: Vec3,
    direction: Vec3,
    max_range: f32,
    ignore: &[EntityId],
) -> HitOutcome {
    let Some(direction) = direction.try_normalize() else {
        warn!(?origin, "Trace with zero direction, resolving as miss");
        return HitOutcome::NoHit { end_point: origin };
    };
    if !max_range.is_finite() || max_range <= 0.0 {
        warn!(max_range, "Trace with invalid range, resolving as miss");
        return HitOutcome::NoHit { end_point: origin };
    }
    caster.cast_ray(origin, direction, max_range, ignore)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A single infinite plane at x = `x`
    struct PlaneAtX {
        x: f32,
        actor: EntityId,
    }

    impl RayCaster for PlaneAtX {
        fn cast_ray(&self, origin: Vec3, direction: Vec3, max_range: f32, ignore: &[EntityId]) -> HitOutcome {
            let end = origin + direction * max_range;
            if ignore.contains(&self.actor) || direction.x <= 0.0 {
                return HitOutcome::NoHit { end_point: end };
            }
            let t = (self.x - origin.x) / direction.x;
            if t < 0.0 || t > max_range {
                return HitOutcome::NoHit { end_point: end };
            }
            HitOutcome::Hit {
                actor: self.actor,
                impact_point: origin + direction * t,
                impact_normal: Vec3::NEG_X,
            }
        }
    }

    #[test]
    fn test_hit_within_range() {
        let wall = PlaneAtX { x: 5.0, actor: EntityId::from_u128(9) };
        let outcome = resolve(&wall, Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), 10.0, &[]);
        assert_eq!(outcome.actor(), Some(EntityId::from_u128(9)));
        assert_eq!(outcome.endpoint(), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_miss_ends_at_max_range() {
        let wall = PlaneAtX { x: 50.0, actor: EntityId::from_u128(9) };
        let outcome = resolve(&wall, Vec3::ONE, Vec3::X, 10.0, &[]);
        assert_eq!(outcome, HitOutcome::NoHit { end_point: Vec3::new(11.0, 1.0, 1.0) });
        assert!(!outcome.is_blocking());
    }

    #[test]
    fn test_ignored_actor_is_transparent() {
        let actor = EntityId::from_u128(3);
        let wall = PlaneAtX { x: 1.0, actor };
        let outcome = resolve(&wall, Vec3::ZERO, Vec3::X, 10.0, &[actor]);
        assert!(!outcome.is_blocking());
    }

    #[test]
    fn test_degenerate_trace_is_a_miss_at_origin() {
        let wall = PlaneAtX { x: 1.0, actor: EntityId::from_u128(1) };
        let origin = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(
            resolve(&wall, origin, Vec3::ZERO, 10.0, &[]),
            HitOutcome::NoHit { end_point: origin }
        );
        assert_eq!(
            resolve(&wall, origin, Vec3::X, 0.0, &[]),
            HitOutcome::NoHit { end_point: origin }
        );
    }
}
