//! Proxy peer: forwards intents, predicts its own shots, presents the rest

use glam::Vec3;
use tracing::{debug, warn};

use crate::game::authority::{AuthorityGate, CombatAction, Routing};
use crate::game::combat::{EffectOutcome, FireContext, WeaponInstance, WeaponSpec};
use crate::game::hit::RayCaster;
use crate::game::scheduler::Scheduler;
use crate::game::snapshot::{FieldUpdate, FieldValue};
use crate::game::{EntityId, PeerId};
use crate::util::time::{SimClock, SimTime};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::replica::ReplicaStore;

/// Presentation hook. The core decides when and where an effect plays,
/// never how.
pub trait EffectPresenter {
    /// `muzzle` is only known for locally fired shots
    fn present(&mut self, muzzle: Option<Vec3>, impact: Option<Vec3>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalAction {
    Fire,
}

/// Client-side combat model.
///
/// Gameplay state is owned by the server. The local weapon copy only
/// drives predicted presentation of this peer's own shots, which is why
/// the server never replays them back.
pub struct ProxyPeer<P> {
    gate: AuthorityGate,
    entity: Option<EntityId>,
    clock: SimClock,
    scheduler: Scheduler<LocalAction>,
    loadout: Vec<WeaponSpec>,
    weapon: Option<WeaponInstance>,
    slot: Option<usize>,
    eye: Vec3,
    aim: Vec3,
    replica: ReplicaStore,
    presenter: P,
    outbox: Vec<ClientMsg>,
}

impl<P: EffectPresenter> ProxyPeer<P> {
    pub fn new(peer: PeerId, loadout: Vec<WeaponSpec>, presenter: P) -> Self {
        Self {
            gate: AuthorityGate::proxy(peer),
            entity: None,
            clock: SimClock::new(),
            scheduler: Scheduler::new(),
            loadout,
            weapon: None,
            slot: None,
            eye: Vec3::ZERO,
            aim: Vec3::X,
            replica: ReplicaStore::new(),
            presenter,
            outbox: Vec::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.gate.local_peer()
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub fn replica(&self) -> &ReplicaStore {
        &self.replica
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn weapon(&self) -> Option<&WeaponInstance> {
        self.weapon.as_ref()
    }

    pub fn join(&mut self, name: Option<String>) {
        self.outbox.push(ClientMsg::Join { name });
    }

    pub fn leave(&mut self) {
        self.outbox.push(ClientMsg::Leave);
    }

    pub fn aim(&mut self, eye: Vec3, direction: Vec3) {
        self.eye = eye;
        self.aim = direction;
        self.outbox.push(ClientMsg::Aim { eye, direction });
    }

    pub fn start_fire(&mut self) {
        self.forward(CombatAction::StartFire);
        if !self.is_alive() {
            return;
        }
        let now = self.clock.now();
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.start_fire(now, &mut self.scheduler, LocalAction::Fire);
        }
    }

    pub fn stop_fire(&mut self) {
        self.forward(CombatAction::StopFire);
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.stop_fire(&mut self.scheduler);
        }
    }

    pub fn reload(&mut self) {
        self.forward(CombatAction::Reload);
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.reload();
        }
    }

    pub fn equip(&mut self, slot: usize) {
        self.forward(CombatAction::Equip { slot });
        self.equip_local(slot);
    }

    /// Drop the replica and ask the server for everything again
    pub fn resync(&mut self) {
        self.replica.clear();
        self.outbox.push(ClientMsg::Resync);
    }

    /// Run local fire timers. `caster` is the client's view of the world.
    pub fn tick<C: RayCaster + ?Sized>(&mut self, dt: SimTime, caster: Option<&C>) {
        let now = self.clock.advance(dt);
        while let Some((_, LocalAction::Fire)) = self.scheduler.pop_due(now) {
            self.predict_shot(now, caster);
        }
    }

    pub fn receive(&mut self, msg: &ServerMsg) {
        match msg {
            ServerMsg::Joined { entity, .. } => {
                self.entity = Some(*entity);
                self.slot = None;
                self.equip_local(0);
            }
            ServerMsg::Replicate { updates } => {
                for update in updates {
                    self.apply_update(update);
                }
            }
            ServerMsg::ProjectileLaunched { owner, origin, .. } => {
                if Some(*owner) != self.entity {
                    self.presenter.present(Some(*origin), None);
                }
            }
            ServerMsg::ProjectileImpact { point, .. } => {
                self.presenter.present(None, Some(*point));
            }
            ServerMsg::Removed { entity } => {
                self.replica.remove_entity(*entity);
                if Some(*entity) == self.entity {
                    self.entity = None;
                    self.disarm();
                }
            }
            ServerMsg::Error { code, message } => {
                debug!(peer_id = %self.peer(), code, message, "Server refused request");
            }
            _ => {}
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<ClientMsg> {
        std::mem::take(&mut self.outbox)
    }

    fn forward(&mut self, action: CombatAction) {
        match self.gate.route(action) {
            Routing::Forward(request) => self.outbox.push(ClientMsg::from_action(request.action)),
            Routing::Execute(_) => warn!(peer_id = %self.peer(), "Proxy gate routed to local execution"),
        }
    }

    fn is_alive(&self) -> bool {
        self.entity.is_some_and(|e| !self.replica.died(e))
    }

    fn equip_local(&mut self, slot: usize) {
        if self.slot == Some(slot) {
            return;
        }
        let Some(spec) = self.loadout.get(slot).cloned() else {
            return;
        };
        self.disarm();
        self.weapon = Some(WeaponInstance::new(spec));
        self.slot = Some(slot);
    }

    fn disarm(&mut self) {
        if let Some(mut weapon) = self.weapon.take() {
            weapon.stop_fire(&mut self.scheduler);
        }
        self.slot = None;
    }

    fn apply_update(&mut self, update: &FieldUpdate) {
        if !self.replica.apply(update) {
            return;
        }
        let own = Some(update.entity) == self.entity;
        match update.value {
            FieldValue::CosmeticTraceEndpoint(endpoint) if !own => {
                self.presenter.present(None, Some(endpoint));
            }
            FieldValue::Died(true) if own => {
                if let Some(weapon) = self.weapon.as_mut() {
                    weapon.stop_fire(&mut self.scheduler);
                }
            }
            _ => {}
        }
    }

    fn predict_shot<C: RayCaster + ?Sized>(&mut self, now: SimTime, caster: Option<&C>) {
        let Some(entity) = self.entity else {
            return;
        };
        let Some(weapon) = self.weapon.as_mut() else {
            return;
        };
        let ctx = FireContext {
            wielder: entity,
            origin: self.eye,
            direction: self.aim,
            now,
        };
        let Some(report) = weapon.fire(&ctx, caster, &mut self.scheduler) else {
            return;
        };
        let impact = match report.effect {
            EffectOutcome::Traced(outcome) => outcome.is_blocking().then(|| outcome.endpoint()),
            EffectOutcome::Launched(_) | EffectOutcome::Unresolved => None,
        };
        self.presenter.present(Some(report.muzzle), impact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::{ArenaConfig, ArenaState};
    use crate::game::physics::{ArenaGeometry, Body, WorldQuery};
    use crate::game::PeerInput;

    const DT: SimTime = 1.0 / 30.0;

    #[derive(Debug, Default)]
    struct Recorder {
        shots: Vec<(Option<Vec3>, Option<Vec3>)>,
    }

    impl EffectPresenter for Recorder {
        fn present(&mut self, muzzle: Option<Vec3>, impact: Option<Vec3>) {
            self.shots.push((muzzle, impact));
        }
    }

    fn proxy(n: u128) -> ProxyPeer<Recorder> {
        ProxyPeer::new(PeerId::from_u128(n), WeaponSpec::default_loadout(), Recorder::default())
    }

    /// One network round: client messages in, one server step, replies out
    fn round(arena: &mut ArenaState, proxies: &mut [ProxyPeer<Recorder>]) {
        for p in proxies.iter_mut() {
            for msg in p.drain_outbox() {
                arena.handle_input(PeerInput {
                    peer: p.peer(),
                    msg,
                    received_at: 0,
                });
            }
        }
        for out in arena.step(DT) {
            for p in proxies.iter_mut().filter(|p| out.is_for(p.peer())) {
                p.receive(&out.msg);
            }
        }
    }

    fn near(a: Option<Vec3>, b: Vec3) -> bool {
        a.is_some_and(|a| (a - b).length() < 1e-3)
    }

    #[test]
    fn test_proxy_fire_presents_once_everywhere() {
        let mut arena = ArenaState::new(ArenaConfig {
            seed: 3,
            replication_interval: 1,
            ..ArenaConfig::default()
        });
        let mut peers = [proxy(1), proxy(2), proxy(3)];
        let eyes = [
            Vec3::new(-20.0, 1.7, 20.0),
            Vec3::new(-10.0, 1.7, 20.0),
            Vec3::new(-20.0, 1.7, -20.0),
        ];
        for (p, eye) in peers.iter_mut().zip(eyes) {
            p.join(None);
            p.aim(eye, Vec3::X);
        }
        round(&mut arena, &mut peers);
        assert!(peers.iter().all(|p| p.entity().is_some()));

        let geometry = ArenaGeometry::default_layout();
        let bodies: Vec<Body> = peers
            .iter()
            .zip(eyes)
            .filter_map(|(p, center)| {
                p.entity().map(|entity| Body {
                    entity,
                    center,
                    radius: 0.5,
                })
            })
            .collect();
        let world = WorldQuery::new(&geometry, &bodies);

        peers[0].start_fire();
        peers[0].tick(DT, Some(&world));
        round(&mut arena, &mut peers);
        peers[0].stop_fire();
        for _ in 0..10 {
            round(&mut arena, &mut peers);
        }

        let impact = Vec3::new(-10.5, 1.7, 20.0);
        let own = &peers[0].presenter().shots;
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].0, Some(eyes[0]));
        assert!(near(own[0].1, impact));
        for p in &peers[1..] {
            let shots = &p.presenter().shots;
            assert_eq!(shots.len(), 1);
            assert_eq!(shots[0].0, None);
            assert!(near(shots[0].1, impact));
        }

        let target = peers[1].entity().unwrap();
        assert_eq!(peers[2].replica().health(target), Some(80.0));
        assert_eq!(peers[0].weapon().unwrap().ammo().current(), 29);
    }

    #[test]
    fn test_intents_forwarded_before_join() {
        let mut p = proxy(1);
        p.start_fire();
        p.reload();
        p.equip(1);
        assert_eq!(
            p.drain_outbox(),
            vec![ClientMsg::StartFire, ClientMsg::Reload, ClientMsg::Equip { slot: 1 }]
        );
        p.tick::<WorldQuery<'_>>(1.0, None);
        assert!(p.presenter().shots.is_empty());
    }

    #[test]
    fn test_projectile_presentation() {
        let mut p = proxy(1);
        let me = EntityId::from_u128(10);
        let other = EntityId::from_u128(11);
        p.receive(&ServerMsg::Joined {
            entity: me,
            loadout: vec![],
            combatants: vec![],
        });
        for owner in [me, other] {
            p.receive(&ServerMsg::ProjectileLaunched {
                projectile: EntityId::from_u128(20),
                owner,
                origin: Vec3::ONE,
                velocity: Vec3::X,
            });
        }
        p.receive(&ServerMsg::ProjectileImpact {
            projectile: EntityId::from_u128(20),
            point: Vec3::Y,
            target: None,
        });
        assert_eq!(
            p.presenter().shots,
            vec![(Some(Vec3::ONE), None), (None, Some(Vec3::Y))]
        );
    }

    #[test]
    fn test_death_stops_local_prediction() {
        let geometry = ArenaGeometry::default_layout();
        let world = WorldQuery::new(&geometry, &[]);
        let mut p = proxy(1);
        let me = EntityId::from_u128(10);
        p.receive(&ServerMsg::Joined {
            entity: me,
            loadout: vec![],
            combatants: vec![],
        });
        p.aim(Vec3::new(0.0, 1.7, 20.0), Vec3::X);
        p.receive(&ServerMsg::Replicate {
            updates: vec![FieldUpdate {
                entity: me,
                version: 1,
                value: FieldValue::Died(true),
            }],
        });
        p.start_fire();
        p.tick(1.0, Some(&world));
        assert!(p.presenter().shots.is_empty());
    }

    #[test]
    fn test_own_trace_not_replayed() {
        let mut p = proxy(1);
        let me = EntityId::from_u128(10);
        p.receive(&ServerMsg::Joined {
            entity: me,
            loadout: vec![],
            combatants: vec![],
        });
        p.receive(&ServerMsg::Replicate {
            updates: vec![FieldUpdate {
                entity: me,
                version: 1,
                value: FieldValue::CosmeticTraceEndpoint(Vec3::X),
            }],
        });
        assert!(p.presenter().shots.is_empty());
        assert_eq!(p.replica().trace_endpoint(me), Some(Vec3::X));
    }
}
