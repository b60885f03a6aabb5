//! Arena collision geometry for weapon traces

use glam::Vec3;

use super::hit::{HitOutcome, RayCaster};
use super::EntityId;

/// Axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Slab test. Returns entry distance and surface normal; a ray starting
    /// inside the box hits at distance 0 facing back along the ray.
    pub fn ray_intersect(&self, origin: Vec3, direction: Vec3) -> Option<(f32, Vec3)> {
        let inv = direction.recip();
        let t1 = (self.min - origin) * inv;
        let t2 = (self.max - origin) * inv;
        let near = t1.min(t2);
        let far = t1.max(t2);

        let tmin = near.max_element();
        let tmax = far.min_element();
        if tmax < 0.0 || tmin > tmax || tmin.is_nan() {
            return None;
        }
        if tmin < 0.0 {
            return Some((0.0, -direction));
        }

        let normal = if tmin == near.x {
            Vec3::new(-direction.x.signum(), 0.0, 0.0)
        } else if tmin == near.y {
            Vec3::new(0.0, -direction.y.signum(), 0.0)
        } else {
            Vec3::new(0.0, 0.0, -direction.z.signum())
        };
        Some((tmin, normal))
    }
}

/// Static blocking geometry. Walls carry ids so a trace can name what it hit;
/// they have no health, so damage delivered to them is dropped.
#[derive(Debug, Clone, Copy)]
pub struct Wall {
    pub id: EntityId,
    pub bounds: Aabb,
}

/// Hit sphere of a live combatant
#[derive(Debug, Clone, Copy)]
pub struct Body {
    pub entity: EntityId,
    pub center: Vec3,
    pub radius: f32,
}

impl Body {
    pub fn ray_intersect(&self, origin: Vec3, direction: Vec3) -> Option<(f32, Vec3)> {
        let offset = origin - self.center;
        let b = offset.dot(direction);
        let c = offset.length_squared() - self.radius * self.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let t = if -b - root >= 0.0 { -b - root } else { -b + root };
        if t < 0.0 {
            return None;
        }
        let point = origin + direction * t;
        let normal = (point - self.center).try_normalize().unwrap_or(-direction);
        Some((t, normal))
    }
}

/// Static arena layout
#[derive(Debug, Clone, Default)]
pub struct ArenaGeometry {
    walls: Vec<Wall>,
}

/// Half extent of the default arena floor
pub const ARENA_HALF_EXTENT: f32 = 50.0;
/// Height of the default perimeter walls
pub const WALL_HEIGHT: f32 = 6.0;

impl ArenaGeometry {
    pub fn new(walls: Vec<Wall>) -> Self {
        Self { walls }
    }

    /// Square floor, four perimeter walls and a central pillar
    pub fn default_layout() -> Self {
        let e = ARENA_HALF_EXTENT;
        let h = WALL_HEIGHT;
        let boxes = [
            Aabb::new(Vec3::new(-e, -1.0, -e), Vec3::new(e, 0.0, e)),
            Aabb::new(Vec3::new(-e - 1.0, 0.0, -e), Vec3::new(-e, h, e)),
            Aabb::new(Vec3::new(e, 0.0, -e), Vec3::new(e + 1.0, h, e)),
            Aabb::new(Vec3::new(-e, 0.0, -e - 1.0), Vec3::new(e, h, -e)),
            Aabb::new(Vec3::new(-e, 0.0, e), Vec3::new(e, h, e + 1.0)),
            Aabb::new(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, h, 2.0)),
        ];
        Self {
            walls: boxes
                .into_iter()
                .map(|bounds| Wall {
                    id: EntityId::new(),
                    bounds,
                })
                .collect(),
        }
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }
}

/// Ray-cast view over the static layout plus this tick's live bodies
pub struct WorldQuery<'a> {
    geometry: &'a ArenaGeometry,
    bodies: &'a [Body],
}

impl<'a> WorldQuery<'a> {
    pub fn new(geometry: &'a ArenaGeometry, bodies: &'a [Body]) -> Self {
        Self { geometry, bodies }
    }
}

impl RayCaster for WorldQuery<'_> {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_range: f32,
        ignore: &[EntityId],
    ) -> HitOutcome {
        let walls = self
            .geometry
            .walls
            .iter()
            .filter(|w| !ignore.contains(&w.id))
            .filter_map(|w| w.bounds.ray_intersect(origin, direction).map(|(t, n)| (t, n, w.id)));
        let bodies = self
            .bodies
            .iter()
            .filter(|b| !ignore.contains(&b.entity))
            .filter_map(|b| b.ray_intersect(origin, direction).map(|(t, n)| (t, n, b.entity)));

        let closest = walls
            .chain(bodies)
            .filter(|(t, _, _)| *t <= max_range)
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match closest {
            Some((t, normal, actor)) => HitOutcome::Hit {
                actor,
                impact_point: origin + direction * t,
                impact_normal: normal,
            },
            None => HitOutcome::NoHit {
                end_point: origin + direction * max_range,
            },
        }
    }
}
