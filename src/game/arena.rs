//! Authoritative arena state and tick loop

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::util::time::{tick_delta, SimClock, SimTime, SIMULATION_TPS, TICK_DURATION_MICROS};
use crate::ws::protocol::{ClientMsg, CombatantInfo, ServerMsg};

use super::authority::{
    ActionRequest, AdmissionContext, AuthorityGate, CombatAction, PolicyKind, Rejection, Routing,
};
use super::combat::{EffectOutcome, FireContext, Projectile, ProjectileStep, WeaponInstance, WeaponSpec};
use super::damage::{DamageApplier, DamageEvent, DamageReceiver};
use super::death::{DeathCoordinator, LifeState};
use super::health::{HealthChanged, HealthState};
use super::physics::{ArenaGeometry, Body, WorldQuery, ARENA_HALF_EXTENT};
use super::scheduler::Scheduler;
use super::snapshot::{CosmeticReplicator, FieldValue, Recipients, ReplicationServer};
use super::{EntityId, PeerId, PeerInput};

/// Eye height above the floor for spawned combatants
pub const EYE_HEIGHT: f32 = 1.7;
pub const COMBATANT_RADIUS: f32 = 0.5;
pub const MAX_NAME_LEN: usize = 24;

const SPAWN_MIN_RADIUS: f32 = 8.0;
const SPAWN_MAX_RADIUS: f32 = ARENA_HALF_EXTENT * 0.8;

/// Timer payloads dispatched by the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    Fire { shooter: EntityId },
    Remove { entity: EntityId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("peer already controls a combatant")]
    AlreadyJoined,

    #[error("arena is full")]
    Full,
}

impl ArenaError {
    pub fn code(&self) -> &'static str {
        match self {
            ArenaError::AlreadyJoined => "already_joined",
            ArenaError::Full => "arena_full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub seed: u64,
    pub max_combatants: usize,
    pub max_health: f32,
    /// Seconds between death and removal
    pub death_grace: SimTime,
    pub policy: PolicyKind,
    pub loadout: Vec<WeaponSpec>,
    /// Simulation ticks between replication diffs
    pub replication_interval: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_combatants: 32,
            max_health: 100.0,
            death_grace: 10.0,
            policy: PolicyKind::AcceptAll,
            loadout: WeaponSpec::default_loadout(),
            replication_interval: (SIMULATION_TPS / 20).max(1),
        }
    }
}

/// A server message and the peers it is meant for
#[derive(Debug, Clone)]
pub struct Outbound {
    pub recipients: Recipients,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self {
            recipients: Recipients::All,
            msg,
        }
    }

    pub fn only(peer: PeerId, msg: ServerMsg) -> Self {
        Self {
            recipients: Recipients::Only(peer),
            msg,
        }
    }

    pub fn is_for(&self, peer: PeerId) -> bool {
        self.recipients.includes(peer)
    }
}

/// Authoritative state of one combatant
#[derive(Debug)]
pub struct Combatant {
    pub entity: EntityId,
    pub peer: Option<PeerId>,
    pub name: String,
    pub eye: Vec3,
    pub aim: Vec3,
    pub health: HealthState,
    pub death: DeathCoordinator,
    pub loadout: Vec<WeaponSpec>,
    pub weapon: Option<WeaponInstance>,
    pub slot: Option<usize>,
}

impl Combatant {
    pub fn info(&self) -> CombatantInfo {
        CombatantInfo {
            entity: self.entity,
            peer_id: self.peer,
            name: self.name.clone(),
            max_health: self.health.max(),
        }
    }

    fn admission(&self) -> AdmissionContext {
        AdmissionContext {
            has_combatant: true,
            accepts_input: self.death.accepts_input(),
            weapon_equipped: self.weapon.is_some(),
            can_fire: self.weapon.as_ref().is_some_and(|w| w.ammo().can_fire()),
            loadout_len: self.loadout.len(),
        }
    }

    fn body(&self) -> Body {
        Body {
            entity: self.entity,
            center: self.eye,
            radius: COMBATANT_RADIUS,
        }
    }
}

/// Arena state (owned by the arena task)
pub struct ArenaState {
    config: ArenaConfig,
    clock: SimClock,
    geometry: ArenaGeometry,
    gate: AuthorityGate,
    scheduler: Scheduler<ScheduledAction>,
    replication: ReplicationServer,
    combatants: BTreeMap<EntityId, Combatant>,
    controlled: HashMap<PeerId, EntityId>,
    observers: BTreeSet<PeerId>,
    projectiles: Vec<Projectile>,
    rng: ChaCha8Rng,
    health_tx: mpsc::UnboundedSender<(EntityId, HealthChanged)>,
    health_rx: mpsc::UnboundedReceiver<(EntityId, HealthChanged)>,
    outbox: Vec<Outbound>,
}

impl ArenaState {
    pub fn new(config: ArenaConfig) -> Self {
        let (health_tx, health_rx) = mpsc::unbounded_channel();
        Self {
            clock: SimClock::new(),
            geometry: ArenaGeometry::default_layout(),
            gate: AuthorityGate::authoritative(PeerId::new(), config.policy.build()),
            scheduler: Scheduler::new(),
            replication: ReplicationServer::new(config.replication_interval),
            combatants: BTreeMap::new(),
            controlled: HashMap::new(),
            observers: BTreeSet::new(),
            projectiles: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            health_tx,
            health_rx,
            outbox: Vec::new(),
            config,
        }
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn gate(&self) -> &AuthorityGate {
        &self.gate
    }

    pub fn combatant(&self, entity: EntityId) -> Option<&Combatant> {
        self.combatants.get(&entity)
    }

    pub fn entity_of(&self, peer: PeerId) -> Option<EntityId> {
        self.controlled.get(&peer).copied()
    }

    pub fn combatant_count(&self) -> usize {
        self.combatants.len()
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    /// Spawn a combatant, controlled by `peer` or by the server if `None`
    pub fn join(&mut self, peer: Option<PeerId>, name: Option<String>) -> Result<EntityId, ArenaError> {
        if peer.is_some_and(|p| self.controlled.contains_key(&p)) {
            return Err(ArenaError::AlreadyJoined);
        }
        if self.combatants.len() >= self.config.max_combatants {
            return Err(ArenaError::Full);
        }

        let entity = EntityId::new();
        let eye = self.spawn_point();
        let name = name
            .map(|n| n.trim().chars().take(MAX_NAME_LEN).collect::<String>())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Combatant_{}", &entity.to_string()[..8]));

        let mut health = HealthState::new(entity, self.config.max_health);
        let health_tx = self.health_tx.clone();
        health.subscribe(move |change| {
            let _ = health_tx.send((entity, *change));
        });

        self.replication
            .write(entity, FieldValue::CurrentHealth(health.current()), Recipients::All);
        self.replication
            .write(entity, FieldValue::Died(false), Recipients::All);

        let combatant = Combatant {
            entity,
            peer,
            name,
            eye,
            aim: Vec3::new(-eye.x, 0.0, -eye.z).try_normalize().unwrap_or(Vec3::X),
            health,
            death: DeathCoordinator::new(),
            loadout: self.config.loadout.clone(),
            weapon: None,
            slot: None,
        };
        let info = combatant.info();
        let has_loadout = !combatant.loadout.is_empty();
        self.combatants.insert(entity, combatant);
        if has_loadout {
            self.execute(entity, CombatAction::Equip { slot: 0 });
        }

        if let Some(peer) = peer {
            self.controlled.insert(peer, entity);
            self.observers.insert(peer);
            self.outbox.push(Outbound::only(
                peer,
                ServerMsg::Joined {
                    entity,
                    loadout: self.config.loadout.iter().map(|w| w.name.clone()).collect(),
                    combatants: self.combatants.values().map(Combatant::info).collect(),
                },
            ));
        }
        self.outbox.push(Outbound {
            recipients: peer.map_or(Recipients::All, Recipients::AllExcept),
            msg: ServerMsg::CombatantJoined { combatant: info },
        });
        self.replication.force_next();

        info!(
            entity = %entity,
            peer_id = ?peer,
            combatants = self.combatants.len(),
            "Combatant joined arena"
        );
        Ok(entity)
    }

    /// Disconnect a peer and despawn whatever it controls
    pub fn leave(&mut self, peer: PeerId) {
        self.observers.remove(&peer);
        self.replication.forget_peer(peer);
        if let Some(entity) = self.controlled.remove(&peer) {
            self.despawn(entity);
            info!(peer_id = %peer, entity = %entity, "Peer left arena");
        }
    }

    /// Resend the full replicated state to `peer` on the next diff
    pub fn resync(&mut self, peer: PeerId) {
        self.replication.forget_peer(peer);
        self.replication.force_next();
    }

    /// Client-reported pose. Ignored once the combatant stops accepting input.
    pub fn set_aim(&mut self, peer: PeerId, eye: Vec3, direction: Vec3) -> bool {
        match self.controlled.get(&peer) {
            Some(&entity) => self.set_pose(entity, eye, direction),
            None => false,
        }
    }

    pub fn set_pose(&mut self, entity: EntityId, eye: Vec3, direction: Vec3) -> bool {
        if !eye.is_finite() || !direction.is_finite() {
            debug!(entity = %entity, "Non-finite pose ignored");
            return false;
        }
        match self.combatants.get_mut(&entity) {
            Some(c) if c.death.accepts_input() => {
                c.eye = eye;
                c.aim = direction;
                true
            }
            _ => false,
        }
    }

    /// Admit a forwarded intent and run it
    pub fn submit(&mut self, request: ActionRequest) -> Result<(), Rejection> {
        let entity = self.controlled.get(&request.sender).copied();
        let ctx = entity
            .and_then(|e| self.combatants.get(&e))
            .map(Combatant::admission)
            .unwrap_or_else(AdmissionContext::unknown);

        match (self.gate.admit(&request, &ctx), entity) {
            (Ok(action), Some(entity)) => {
                self.execute(entity, action);
                Ok(())
            }
            (Ok(_), None) => Err(Rejection::UnknownSender),
            (Err(reason), _) => {
                self.outbox.push(Outbound::only(
                    request.sender,
                    ServerMsg::error("rejected", reason.to_string()),
                ));
                Err(reason)
            }
        }
    }

    /// Apply one inbound client message
    pub fn handle_input(&mut self, input: PeerInput) {
        let peer = input.peer;
        match input.msg {
            ClientMsg::Join { name } => {
                if let Err(e) = self.join(Some(peer), name) {
                    warn!(peer_id = %peer, error = %e, "Join refused");
                    self.outbox
                        .push(Outbound::only(peer, ServerMsg::error(e.code(), e.to_string())));
                }
            }
            ClientMsg::Aim { eye, direction } => {
                self.set_aim(peer, eye, direction);
            }
            msg @ (ClientMsg::StartFire
            | ClientMsg::StopFire
            | ClientMsg::Reload
            | ClientMsg::Equip { .. }) => {
                if let Some(action) = msg.as_action() {
                    let _ = self.submit(ActionRequest {
                        sender: peer,
                        action,
                    });
                }
            }
            ClientMsg::Ping { t } => {
                self.outbox.push(Outbound::only(peer, ServerMsg::Pong { t }));
            }
            ClientMsg::Resync => self.resync(peer),
            ClientMsg::Leave => self.leave(peer),
        }
    }

    /// Advance the simulation by `dt` seconds and return queued messages
    pub fn step(&mut self, dt: SimTime) -> Vec<Outbound> {
        let now = self.clock.advance(dt);

        while let Some((_, action)) = self.scheduler.pop_due(now) {
            match action {
                ScheduledAction::Fire { shooter } => self.fire(shooter),
                ScheduledAction::Remove { entity } => self.complete_removal(entity),
            }
            self.flush_health_notifications();
        }

        self.advance_projectiles(dt as f32);

        if self.replication.should_send() {
            for &peer in &self.observers {
                let updates = self.replication.collect_for(peer);
                if !updates.is_empty() {
                    self.outbox
                        .push(Outbound::only(peer, ServerMsg::Replicate { updates }));
                }
            }
        }

        std::mem::take(&mut self.outbox)
    }

    fn execute(&mut self, entity: EntityId, action: CombatAction) {
        let now = self.clock.now();
        let Some(c) = self.combatants.get_mut(&entity) else {
            return;
        };

        match action {
            CombatAction::StartFire => {
                if let Some(weapon) = c.weapon.as_mut() {
                    let started = weapon.start_fire(
                        now,
                        &mut self.scheduler,
                        ScheduledAction::Fire { shooter: entity },
                    );
                    if !started {
                        debug!(entity = %entity, "Start fire had no effect");
                    }
                }
            }
            CombatAction::StopFire => {
                if let Some(weapon) = c.weapon.as_mut() {
                    weapon.stop_fire(&mut self.scheduler);
                }
            }
            CombatAction::Reload => {
                if let Some(weapon) = c.weapon.as_mut() {
                    weapon.reload();
                    debug!(entity = %entity, weapon = %weapon.id(), "Reloaded");
                }
            }
            CombatAction::Equip { slot } => {
                if c.slot == Some(slot) {
                    return;
                }
                let Some(spec) = c.loadout.get(slot).cloned() else {
                    debug!(entity = %entity, slot, "Equip of empty slot ignored");
                    return;
                };
                if let Some(mut old) = c.weapon.take() {
                    old.stop_fire(&mut self.scheduler);
                }
                let weapon = WeaponInstance::new(spec);
                let identity = weapon.identity();
                c.weapon = Some(weapon);
                c.slot = Some(slot);
                self.replication.write(
                    entity,
                    FieldValue::EquippedWeapon(Some(identity)),
                    Recipients::All,
                );
            }
        }
    }

    /// One tick of the fire timer: resolve, replicate, apply damage
    fn fire(&mut self, shooter: EntityId) {
        let now = self.clock.now();
        let bodies = self.live_bodies();
        let Some(c) = self.combatants.get_mut(&shooter) else {
            return;
        };
        if !c.death.accepts_input() {
            return;
        }
        let originator = c.peer;
        let ctx = FireContext {
            wielder: shooter,
            origin: c.eye,
            direction: c.aim,
            now,
        };
        let Some(weapon) = c.weapon.as_mut() else {
            return;
        };

        let query = WorldQuery::new(&self.geometry, &bodies);
        let Some(report) = weapon.fire(&ctx, Some(&query), &mut self.scheduler) else {
            return;
        };
        if report.exhausted {
            debug!(entity = %shooter, weapon = %weapon.id(), "Magazine empty, fire stopped");
        }
        let causer = weapon.id();
        let base_damage = weapon.spec().base_damage;
        let kind = weapon.spec().damage_kind;

        match report.effect {
            EffectOutcome::Traced(outcome) => {
                CosmeticReplicator::publish(
                    &mut self.replication,
                    weapon,
                    shooter,
                    originator,
                    outcome.endpoint(),
                );
                DamageApplier::apply(self, &outcome, base_damage, kind, shooter, causer);
            }
            EffectOutcome::Launched(projectile) => {
                self.outbox.push(Outbound::all(ServerMsg::ProjectileLaunched {
                    projectile: projectile.id,
                    owner: projectile.owner,
                    origin: projectile.position,
                    velocity: projectile.velocity,
                }));
                self.projectiles.push(projectile);
            }
            EffectOutcome::Unresolved => {}
        }
    }

    fn advance_projectiles(&mut self, dt: f32) {
        if self.projectiles.is_empty() {
            return;
        }
        let bodies = self.live_bodies();
        let query = WorldQuery::new(&self.geometry, &bodies);
        let mut impacts = Vec::new();
        for mut projectile in std::mem::take(&mut self.projectiles) {
            match projectile.advance(dt, &query) {
                ProjectileStep::Flying => self.projectiles.push(projectile),
                ProjectileStep::Impact(outcome) => impacts.push((projectile, outcome)),
                ProjectileStep::Expired => {
                    debug!(projectile = %projectile.id, "Projectile expired");
                }
            }
        }

        for (projectile, outcome) in impacts {
            let target = outcome.actor().filter(|a| self.combatants.contains_key(a));
            self.outbox.push(Outbound::all(ServerMsg::ProjectileImpact {
                projectile: projectile.id,
                point: outcome.endpoint(),
                target,
            }));
            DamageApplier::apply(
                self,
                &outcome,
                projectile.damage,
                projectile.kind,
                projectile.owner,
                projectile.id,
            );
            self.flush_health_notifications();
        }
    }

    fn complete_removal(&mut self, entity: EntityId) {
        let Some(c) = self.combatants.get_mut(&entity) else {
            return;
        };
        if !c.death.complete_removal() {
            warn!(entity = %entity, state = ?c.death.state(), "Removal fired outside dying state");
            return;
        }
        info!(entity = %entity, "Combatant removed");
        self.despawn(entity);
    }

    fn despawn(&mut self, entity: EntityId) -> Option<Combatant> {
        let mut c = self.combatants.remove(&entity)?;
        if let Some(weapon) = c.weapon.as_mut() {
            weapon.stop_fire(&mut self.scheduler);
        }
        c.death.abandon(&mut self.scheduler);
        if let Some(peer) = c.peer {
            if self.controlled.get(&peer) == Some(&entity) {
                self.controlled.remove(&peer);
            }
        }
        self.replication.remove_entity(entity);
        self.outbox.push(Outbound::all(ServerMsg::Removed { entity }));
        Some(c)
    }

    fn flush_health_notifications(&mut self) {
        while let Ok((entity, change)) = self.health_rx.try_recv() {
            self.outbox
                .push(Outbound::all(ServerMsg::HealthChanged { entity, change }));
        }
    }

    /// Dying and dead combatants no longer block traces
    fn live_bodies(&self) -> Vec<Body> {
        self.combatants
            .values()
            .filter(|c| c.death.state() == LifeState::Alive)
            .map(Combatant::body)
            .collect()
    }

    fn spawn_point(&mut self) -> Vec3 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.rng.gen_range(SPAWN_MIN_RADIUS..SPAWN_MAX_RADIUS);
        Vec3::new(angle.cos() * distance, EYE_HEIGHT, angle.sin() * distance)
    }
}

impl DamageReceiver for ArenaState {
    fn receive_damage(&mut self, event: DamageEvent) {
        let now = self.clock.now();
        let grace = self.config.death_grace;
        let Some(target) = self.combatants.get_mut(&event.target) else {
            debug!(target = %event.target, "Damage to non-combatant ignored");
            return;
        };
        let Some(outcome) = target.health.apply_damage(&event) else {
            return;
        };

        self.replication.write(
            event.target,
            FieldValue::CurrentHealth(outcome.notification.new_health),
            Recipients::All,
        );
        if !outcome.died_now {
            return;
        }

        self.replication
            .write(event.target, FieldValue::Died(true), Recipients::All);
        let removal = ScheduledAction::Remove {
            entity: event.target,
        };
        if target.death.begin_dying(now, grace, &mut self.scheduler, removal) {
            info!(
                entity = %event.target,
                instigator = %event.instigator,
                causer = %event.causer,
                "Combatant died"
            );
            self.replication.force_next();
            if let Routing::Execute(action) = self.gate.route(CombatAction::StopFire) {
                self.execute(event.target, action);
            }
        }
    }
}

/// Handle to the running arena task
#[derive(Clone)]
pub struct ArenaHandle {
    pub input_tx: mpsc::Sender<PeerInput>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub combatant_count: Arc<AtomicUsize>,
}

impl ArenaHandle {
    pub fn combatant_count(&self) -> usize {
        self.combatant_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }
}

/// The authoritative arena task
pub struct Arena {
    state: ArenaState,
    input_rx: mpsc::Receiver<PeerInput>,
    outbound_tx: broadcast::Sender<Outbound>,
    combatant_count: Arc<AtomicUsize>,
}

impl Arena {
    pub fn new(config: ArenaConfig) -> (Self, ArenaHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (outbound_tx, _) = broadcast::channel(256);
        let combatant_count = Arc::new(AtomicUsize::new(0));

        let handle = ArenaHandle {
            input_tx,
            outbound_tx: outbound_tx.clone(),
            combatant_count: combatant_count.clone(),
        };

        let arena = Self {
            state: ArenaState::new(config),
            input_rx,
            outbound_tx,
            combatant_count,
        };

        (arena, handle)
    }

    /// Run the authoritative tick loop until every input sender is gone
    pub async fn run(mut self) {
        info!(
            seed = self.state.config.seed,
            policy = self.state.gate.policy_name(),
            "Arena started"
        );

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            if !self.process_inputs() {
                info!("Input channel closed, stopping arena");
                break;
            }

            let outbound = self.state.step(tick_delta());
            self.combatant_count
                .store(self.state.combatant_count(), Ordering::Relaxed);

            // No receivers just means nobody is connected
            for message in outbound {
                let _ = self.outbound_tx.send(message);
            }
        }
    }

    /// Drain pending inputs. Returns false once the channel is closed.
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.state.handle_input(input),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::FieldUpdate;

    const DT: SimTime = 1.0 / 30.0;
    const A: PeerId = PeerId::from_u128(1);
    const B: PeerId = PeerId::from_u128(2);
    const C: PeerId = PeerId::from_u128(3);

    fn arena_with(config: ArenaConfig) -> ArenaState {
        ArenaState::new(ArenaConfig {
            seed: 7,
            replication_interval: 1,
            ..config
        })
    }

    fn arena() -> ArenaState {
        arena_with(ArenaConfig::default())
    }

    fn place(arena: &mut ArenaState, peer: PeerId, eye: Vec3, direction: Vec3) -> EntityId {
        let entity = arena.join(Some(peer), None).unwrap();
        assert!(arena.set_aim(peer, eye, direction));
        entity
    }

    fn act(arena: &mut ArenaState, sender: PeerId, action: CombatAction) -> Result<(), Rejection> {
        arena.submit(ActionRequest { sender, action })
    }

    fn run(arena: &mut ArenaState, seconds: SimTime) -> Vec<Outbound> {
        let steps = (seconds / DT).round() as usize;
        (0..steps).flat_map(|_| arena.step(DT)).collect()
    }

    fn updates_for(out: &[Outbound], peer: PeerId) -> Vec<FieldUpdate> {
        out.iter()
            .filter(|o| o.is_for(peer))
            .filter_map(|o| match &o.msg {
                ServerMsg::Replicate { updates } => Some(updates.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn traces(updates: &[FieldUpdate]) -> Vec<Vec3> {
        updates
            .iter()
            .filter_map(|u| match u.value {
                FieldValue::CosmeticTraceEndpoint(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_announces_and_replicates_initial_state() {
        let mut arena = arena();
        let entity = arena.join(Some(A), Some("  ace  ".to_string())).unwrap();
        assert_eq!(arena.join(Some(A), None), Err(ArenaError::AlreadyJoined));

        let out = arena.step(DT);
        assert!(out.iter().any(|o| o.is_for(A)
            && matches!(&o.msg, ServerMsg::Joined { entity: e, .. } if *e == entity)));
        assert!(!out
            .iter()
            .any(|o| o.is_for(A) && matches!(o.msg, ServerMsg::CombatantJoined { .. })));

        let fields: Vec<FieldValue> = updates_for(&out, A).into_iter().map(|u| u.value).collect();
        assert!(fields.contains(&FieldValue::CurrentHealth(100.0)));
        assert!(fields.contains(&FieldValue::Died(false)));
        assert!(fields
            .iter()
            .any(|f| matches!(f, FieldValue::EquippedWeapon(Some(w)) if w.name == "rifle")));
        assert_eq!(arena.combatant(entity).unwrap().name, "ace");
    }

    #[test]
    fn test_arena_full() {
        let mut arena = arena_with(ArenaConfig {
            max_combatants: 1,
            ..ArenaConfig::default()
        });
        arena.join(Some(A), None).unwrap();
        assert_eq!(arena.join(Some(B), None), Err(ArenaError::Full));
    }

    #[test]
    fn test_trace_reaches_every_observer_but_the_shooter() {
        let mut arena = arena();
        place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        let target = place(&mut arena, B, Vec3::new(-10.0, 1.7, 20.0), Vec3::NEG_X);
        place(&mut arena, C, Vec3::new(-20.0, 1.7, -20.0), Vec3::Z);
        arena.step(DT);

        act(&mut arena, A, CombatAction::StartFire).unwrap();
        let mut out = arena.step(DT);
        act(&mut arena, A, CombatAction::StopFire).unwrap();
        out.extend(run(&mut arena, 1.0));

        assert!(traces(&updates_for(&out, A)).is_empty());
        for peer in [B, C] {
            let seen = traces(&updates_for(&out, peer));
            assert_eq!(seen.len(), 1);
            assert!((seen[0] - Vec3::new(-10.5, 1.7, 20.0)).length() < 1e-3);
        }

        assert_eq!(arena.combatant(target).unwrap().health.current(), 80.0);
        let notified: Vec<f32> = out
            .iter()
            .filter_map(|o| match &o.msg {
                ServerMsg::HealthChanged { entity, change } if *entity == target => {
                    Some(change.new_health)
                }
                _ => None,
            })
            .collect();
        assert_eq!(notified, vec![80.0]);
    }

    #[test]
    fn test_death_disables_input_then_removes() {
        let mut arena = arena_with(ArenaConfig {
            death_grace: 1.0,
            ..ArenaConfig::default()
        });
        let shooter = place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        let victim = place(&mut arena, B, Vec3::new(-10.0, 1.7, 20.0), Vec3::NEG_X);

        act(&mut arena, A, CombatAction::StartFire).unwrap();
        let out = run(&mut arena, 0.5);

        let c = arena.combatant(victim).unwrap();
        assert_eq!(c.health.current(), 0.0);
        assert!(c.health.died());
        assert_eq!(c.death.state(), LifeState::Dying);
        let died: Vec<FieldUpdate> = updates_for(&out, A)
            .into_iter()
            .filter(|u| u.entity == victim && u.value == FieldValue::Died(true))
            .collect();
        assert_eq!(died.len(), 1);

        assert_eq!(act(&mut arena, B, CombatAction::StartFire), Err(Rejection::NotAlive));
        assert!(!arena.set_aim(B, Vec3::ZERO, Vec3::X));

        let out = run(&mut arena, 1.2);
        assert!(arena.combatant(victim).is_none());
        assert!(out
            .iter()
            .any(|o| matches!(o.msg, ServerMsg::Removed { entity } if entity == victim)));
        assert!(arena.combatant(shooter).is_some());

        // Respawn after removal
        let again = arena.join(Some(B), None).unwrap();
        assert_ne!(again, victim);
    }

    #[test]
    fn test_dying_stops_own_fire() {
        let mut arena = arena();
        let a = place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        let b = place(&mut arena, B, Vec3::new(-10.0, 1.7, 20.0), Vec3::NEG_X);
        act(&mut arena, A, CombatAction::StartFire).unwrap();
        act(&mut arena, B, CombatAction::StartFire).unwrap();
        run(&mut arena, 0.6);

        // Both fire at the same cadence; A's shots land first each round
        let dead = arena.combatant(b).unwrap();
        assert_eq!(dead.death.state(), LifeState::Dying);
        assert!(!dead.weapon.as_ref().unwrap().is_firing(&arena.scheduler));
        assert_eq!(arena.combatant(a).unwrap().health.current(), 20.0);
    }

    #[test]
    fn test_leave_despawns_and_cancels_timers() {
        let mut arena = arena();
        let entity = place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        act(&mut arena, A, CombatAction::StartFire).unwrap();
        arena.leave(A);
        assert!(arena.combatant(entity).is_none());
        assert!(arena.scheduler.is_empty());
        assert_eq!(act(&mut arena, A, CombatAction::Reload), Err(Rejection::UnknownSender));
    }

    #[test]
    fn test_equip_replaces_weapon_once() {
        let mut arena = arena();
        let entity = place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        let rifle = arena.combatant(entity).unwrap().weapon.as_ref().unwrap().id();

        act(&mut arena, A, CombatAction::Equip { slot: 0 }).unwrap();
        assert_eq!(arena.combatant(entity).unwrap().weapon.as_ref().unwrap().id(), rifle);

        act(&mut arena, A, CombatAction::Equip { slot: 1 }).unwrap();
        let weapon = arena.combatant(entity).unwrap().weapon.as_ref().unwrap();
        assert_eq!(weapon.spec().name, "launcher");
        assert_eq!(weapon.ammo().current(), 4);

        act(&mut arena, A, CombatAction::Equip { slot: 9 }).unwrap();
        assert_eq!(arena.combatant(entity).unwrap().slot, Some(1));
    }

    #[test]
    fn test_projectile_damages_on_impact() {
        let mut arena = arena();
        place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        let target = place(&mut arena, B, Vec3::new(-10.0, 1.7, 20.0), Vec3::NEG_X);
        act(&mut arena, A, CombatAction::Equip { slot: 1 }).unwrap();

        act(&mut arena, A, CombatAction::StartFire).unwrap();
        let out = run(&mut arena, 1.0);
        act(&mut arena, A, CombatAction::StopFire).unwrap();

        assert!(out
            .iter()
            .any(|o| matches!(o.msg, ServerMsg::ProjectileLaunched { .. })));
        assert!(out.iter().any(|o| matches!(
            o.msg,
            ServerMsg::ProjectileImpact { target: Some(t), .. } if t == target
        )));
        assert_eq!(arena.combatant(target).unwrap().health.current(), 80.0);
        assert_eq!(arena.projectile_count(), 0);
        // Projectiles never write the cosmetic trace
        assert!(traces(&updates_for(&out, B)).is_empty());
    }

    #[test]
    fn test_strict_policy_rechecks_ammo() {
        let mut rifle = WeaponSpec::rifle();
        rifle.magazine_capacity = 1;
        let mut arena = arena_with(ArenaConfig {
            policy: PolicyKind::Strict,
            loadout: vec![rifle],
            ..ArenaConfig::default()
        });
        place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);

        act(&mut arena, A, CombatAction::StartFire).unwrap();
        arena.step(DT);
        assert!(!arena.combatant(arena.entity_of(A).unwrap()).unwrap().admission().can_fire);
        assert_eq!(act(&mut arena, A, CombatAction::StartFire), Err(Rejection::OutOfAmmo));
        let rejected = arena.step(DT);
        assert!(rejected.iter().any(|o| o.is_for(A)
            && matches!(&o.msg, ServerMsg::Error { code, .. } if code == "rejected")));

        act(&mut arena, A, CombatAction::Reload).unwrap();
        act(&mut arena, A, CombatAction::StartFire).unwrap();
    }

    #[test]
    fn test_resync_resends_state() {
        let mut arena = arena();
        place(&mut arena, A, Vec3::new(-20.0, 1.7, 20.0), Vec3::X);
        assert!(!updates_for(&arena.step(DT), A).is_empty());
        assert!(updates_for(&arena.step(DT), A).is_empty());
        arena.resync(A);
        assert!(!updates_for(&arena.step(DT), A).is_empty());
    }

    #[tokio::test]
    async fn test_arena_task_serves_join_and_ping() {
        let (arena, handle) = Arena::new(ArenaConfig::default());
        let mut rx = handle.subscribe();
        let task = tokio::spawn(arena.run());
        let peer = PeerId::new();

        for msg in [
            ClientMsg::Join {
                name: Some("ace".to_string()),
            },
            ClientMsg::Ping { t: 42 },
        ] {
            tokio_test::assert_ok!(
                handle
                    .input_tx
                    .send(PeerInput {
                        peer,
                        msg,
                        received_at: 0,
                    })
                    .await
            );
        }

        let (mut joined, mut pong) = (false, false);
        while !(joined && pong) {
            let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("arena went quiet")
                .expect("outbound channel closed");
            if !out.is_for(peer) {
                continue;
            }
            match out.msg {
                ServerMsg::Joined { .. } => joined = true,
                ServerMsg::Pong { t } => {
                    assert_eq!(t, 42);
                    pong = true;
                }
                _ => {}
            }
        }
        assert_eq!(handle.combatant_count(), 1);

        drop(handle);
        tokio_test::assert_ok!(task.await);
    }
}
