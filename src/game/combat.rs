//! Weapons: specs, per-instance firing state, hitscan and projectile delivery

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::util::time::SimTime;

use super::ammo::{AmmoSignal, AmmoState};
use super::damage::DamageKind;
use super::fire_rate::{interval_from_rpm, FireRateController};
use super::hit::{self, HitOutcome, RayCaster};
use super::scheduler::Scheduler;
use super::EntityId;

/// Projectile flight parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSpec {
    /// Units per second
    pub speed: f32,
    /// Seconds before the projectile expires
    pub lifetime: f32,
}

/// How a shot reaches its target. Both variants share ammo and fire-rate
/// handling and differ only in how the fire effect is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "delivery", rename_all = "snake_case")]
pub enum Delivery {
    Hitscan,
    Projectile(ProjectileSpec),
}

/// Static weapon definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponSpec {
    pub name: String,
    pub base_damage: f32,
    pub rounds_per_minute: f32,
    pub magazine_capacity: u32,
    pub damage_kind: DamageKind,
    /// Maximum trace length for hitscan delivery
    pub max_range: f32,
    pub delivery: Delivery,
}

impl WeaponSpec {
    /// Automatic hitscan rifle
    pub fn rifle() -> Self {
        Self {
            name: "rifle".to_string(),
            base_damage: 20.0,
            rounds_per_minute: 600.0,
            magazine_capacity: 30,
            damage_kind: DamageKind::Ballistic,
            max_range: 10_000.0,
            delivery: Delivery::Hitscan,
        }
    }

    /// Slow-firing projectile launcher
    pub fn launcher() -> Self {
        Self {
            name: "launcher".to_string(),
            base_damage: 20.0,
            rounds_per_minute: 30.0,
            magazine_capacity: 4,
            damage_kind: DamageKind::Explosive,
            max_range: 10_000.0,
            delivery: Delivery::Projectile(ProjectileSpec {
                speed: 40.0,
                lifetime: 5.0,
            }),
        }
    }

    pub fn default_loadout() -> Vec<WeaponSpec> {
        vec![Self::rifle(), Self::launcher()]
    }

    pub fn fire_interval(&self) -> SimTime {
        interval_from_rpm(self.rounds_per_minute)
    }
}

/// Replicated identity of the equipped weapon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponIdentity {
    pub id: EntityId,
    pub name: String,
}

/// Where and how a shot leaves the wielder
#[derive(Debug, Clone, Copy)]
pub struct FireContext {
    pub wielder: EntityId,
    pub origin: Vec3,
    pub direction: Vec3,
    pub now: SimTime,
}

/// What a single shot produced
#[derive(Debug, Clone, PartialEq)]
pub enum EffectOutcome {
    Traced(HitOutcome),
    Launched(Projectile),
    /// A collaborator (ray caster, aim) was missing; nothing happened
    Unresolved,
}

/// A shot that actually went out
#[derive(Debug, Clone, PartialEq)]
pub struct ShotReport {
    pub muzzle: Vec3,
    pub effect: EffectOutcome,
    pub remaining: u32,
    pub exhausted: bool,
}

/// A weapon equipped by exactly one wielder
#[derive(Debug, Clone)]
pub struct WeaponInstance {
    id: EntityId,
    spec: WeaponSpec,
    ammo: AmmoState,
    rate: FireRateController,
    cosmetic_trace_endpoint: Option<Vec3>,
}

impl WeaponInstance {
    pub fn new(spec: WeaponSpec) -> Self {
        Self::with_id(EntityId::new(), spec)
    }

    pub fn with_id(id: EntityId, spec: WeaponSpec) -> Self {
        Self {
            id,
            ammo: AmmoState::new(spec.magazine_capacity),
            rate: FireRateController::new(spec.fire_interval()),
            spec,
            cosmetic_trace_endpoint: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn spec(&self) -> &WeaponSpec {
        &self.spec
    }

    pub fn ammo(&self) -> &AmmoState {
        &self.ammo
    }

    pub fn rate(&self) -> &FireRateController {
        &self.rate
    }

    pub fn identity(&self) -> WeaponIdentity {
        WeaponIdentity {
            id: self.id,
            name: self.spec.name.clone(),
        }
    }

    pub fn cosmetic_trace_endpoint(&self) -> Option<Vec3> {
        self.cosmetic_trace_endpoint
    }

    /// Record the endpoint of the latest trace. Returns false if unchanged.
    pub fn set_cosmetic_trace_endpoint(&mut self, endpoint: Vec3) -> bool {
        if self.cosmetic_trace_endpoint == Some(endpoint) {
            return false;
        }
        self.cosmetic_trace_endpoint = Some(endpoint);
        true
    }

    /// Begin continuous fire. Ignored while the weapon is empty or already
    /// firing.
    pub fn start_fire<A: Clone>(
        &mut self,
        now: SimTime,
        scheduler: &mut Scheduler<A>,
        action: A,
    ) -> bool {
        if !self.ammo.can_fire() {
            debug!(weapon = %self.id, "Start fire ignored, weapon cannot fire");
            return false;
        }
        self.rate.request_fire(now, scheduler, action)
    }

    pub fn stop_fire<A: Clone>(&mut self, scheduler: &mut Scheduler<A>) {
        self.rate.cancel(scheduler);
    }

    pub fn is_firing<A: Clone>(&self, scheduler: &Scheduler<A>) -> bool {
        self.rate.is_active(scheduler)
    }

    pub fn reload(&mut self) {
        self.ammo.reload();
    }

    /// Fire one shot: check ammo, resolve the effect, consume a round and
    /// stop the repeating timer once the magazine runs dry.
    pub fn fire<A, C>(
        &mut self,
        ctx: &FireContext,
        caster: Option<&C>,
        scheduler: &mut Scheduler<A>,
    ) -> Option<ShotReport>
    where
        A: Clone,
        C: RayCaster + ?Sized,
    {
        if !self.ammo.can_consume() {
            self.rate.cancel(scheduler);
            return None;
        }

        let effect = self.resolve_fire_effect(ctx, caster);
        if effect == EffectOutcome::Unresolved {
            return None;
        }

        self.rate.record_shot(ctx.now);
        let exhausted = match self.ammo.consume() {
            AmmoSignal::Exhausted => {
                self.rate.cancel(scheduler);
                true
            }
            AmmoSignal::Loaded(_) | AmmoSignal::Dry => false,
        };

        Some(ShotReport {
            muzzle: ctx.origin,
            effect,
            remaining: self.ammo.current(),
            exhausted,
        })
    }

    /// The variant-specific step of a shot
    pub fn resolve_fire_effect<C: RayCaster + ?Sized>(
        &self,
        ctx: &FireContext,
        caster: Option<&C>,
    ) -> EffectOutcome {
        if ctx.direction.try_normalize().is_none() {
            warn!(weapon = %self.id, wielder = %ctx.wielder, "No aim direction, shot skipped");
            return EffectOutcome::Unresolved;
        }
        match self.spec.delivery {
            Delivery::Hitscan => {
                let Some(caster) = caster else {
                    warn!(weapon = %self.id, "No ray caster available, shot skipped");
                    return EffectOutcome::Unresolved;
                };
                EffectOutcome::Traced(hit::resolve(
                    caster,
                    ctx.origin,
                    ctx.direction,
                    self.spec.max_range,
                    &[ctx.wielder, self.id],
                ))
            }
            Delivery::Projectile(flight) => EffectOutcome::Launched(Projectile::launch(
                ctx,
                self.id,
                &self.spec,
                flight,
            )),
        }
    }
}

/// Result of advancing a projectile one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectileStep {
    Flying,
    Impact(HitOutcome),
    Expired,
}

/// Projectile in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: EntityId,
    pub owner: EntityId,
    pub weapon: EntityId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub damage: f32,
    pub kind: DamageKind,
    pub lifetime_remaining: f32,
}

impl Projectile {
    fn launch(ctx: &FireContext, weapon: EntityId, spec: &WeaponSpec, flight: ProjectileSpec) -> Self {
        Self {
            id: EntityId::new(),
            owner: ctx.wielder,
            weapon,
            position: ctx.origin,
            velocity: ctx.direction.normalize_or_zero() * flight.speed,
            damage: spec.base_damage,
            kind: spec.damage_kind,
            lifetime_remaining: flight.lifetime,
        }
    }

    /// Sweep along this step's path. The owner and its weapon never block.
    pub fn advance<C: RayCaster + ?Sized>(&mut self, dt: f32, caster: &C) -> ProjectileStep {
        let step = self.velocity * dt;
        let distance = step.length();
        if distance > 0.0 {
            let outcome = hit::resolve(caster, self.position, step, distance, &[self.owner, self.weapon]);
            if outcome.is_blocking() {
                self.position = outcome.endpoint();
                return ProjectileStep::Impact(outcome);
            }
            self.position += step;
        }

        self.lifetime_remaining -= dt;
        if self.lifetime_remaining > 0.0 {
            ProjectileStep::Flying
        } else {
            ProjectileStep::Expired
        }
    }
}
