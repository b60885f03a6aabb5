//! Field-level replication and cosmetic trace fan-out

use std::collections::{BTreeMap, HashMap};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::combat::{WeaponIdentity, WeaponInstance};
use super::{EntityId, PeerId};

/// Replicated field of a combatant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    CurrentHealth,
    Died,
    CosmeticTraceEndpoint,
    EquippedWeapon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    CurrentHealth(f32),
    Died(bool),
    CosmeticTraceEndpoint(Vec3),
    EquippedWeapon(Option<WeaponIdentity>),
}

impl FieldValue {
    pub fn key(&self) -> FieldKey {
        match self {
            FieldValue::CurrentHealth(_) => FieldKey::CurrentHealth,
            FieldValue::Died(_) => FieldKey::Died,
            FieldValue::CosmeticTraceEndpoint(_) => FieldKey::CosmeticTraceEndpoint,
            FieldValue::EquippedWeapon(_) => FieldKey::EquippedWeapon,
        }
    }
}

/// Which peers receive a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "peer", rename_all = "snake_case")]
pub enum Recipients {
    All,
    AllExcept(PeerId),
    Only(PeerId),
}

impl Recipients {
    pub fn includes(&self, peer: PeerId) -> bool {
        match self {
            Recipients::All => true,
            Recipients::AllExcept(skip) => *skip != peer,
            Recipients::Only(only) => *only == peer,
        }
    }
}

/// One versioned field value on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub entity: EntityId,
    pub version: u64,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    value: FieldValue,
    recipients: Recipients,
}

/// Authority-side replication table.
///
/// Writes are change-triggered and stamped with a global version. Each peer
/// is sent a field at most once per version, in version order, so a peer
/// that missed intermediate values still converges on the latest one.
#[derive(Debug)]
pub struct ReplicationServer {
    next_version: u64,
    entries: BTreeMap<(EntityId, FieldKey), Entry>,
    acked: HashMap<PeerId, HashMap<(EntityId, FieldKey), u64>>,
    ticks_since_send: u32,
    send_interval: u32,
}

impl ReplicationServer {
    /// `send_interval` is the number of simulation ticks between diffs
    pub fn new(send_interval: u32) -> Self {
        let send_interval = send_interval.max(1);
        Self {
            next_version: 0,
            entries: BTreeMap::new(),
            acked: HashMap::new(),
            ticks_since_send: 0,
            send_interval,
        }
    }

    /// Check if it's time to send a diff
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_send += 1;
        if self.ticks_since_send >= self.send_interval {
            self.ticks_since_send = 0;
            true
        } else {
            false
        }
    }

    /// Send on the next check (joins, deaths)
    pub fn force_next(&mut self) {
        self.ticks_since_send = self.send_interval;
    }

    /// Store a new value. Returns false when it equals the current value.
    pub fn write(&mut self, entity: EntityId, value: FieldValue, recipients: Recipients) -> bool {
        let key = (entity, value.key());
        if self.entries.get(&key).is_some_and(|e| e.value == value) {
            return false;
        }
        self.next_version += 1;
        self.entries.insert(
            key,
            Entry {
                version: self.next_version,
                value,
                recipients,
            },
        );
        true
    }

    pub fn value(&self, entity: EntityId, key: FieldKey) -> Option<&FieldValue> {
        self.entries.get(&(entity, key)).map(|e| &e.value)
    }

    /// Everything `peer` has not seen yet, oldest first
    pub fn collect_for(&mut self, peer: PeerId) -> Vec<FieldUpdate> {
        let acked = self.acked.entry(peer).or_default();
        let mut updates: Vec<FieldUpdate> = self
            .entries
            .iter()
            .filter(|(_, e)| e.recipients.includes(peer))
            .filter(|(key, e)| acked.get(*key).map_or(true, |v| *v < e.version))
            .map(|(&(entity, _), e)| FieldUpdate {
                entity,
                version: e.version,
                value: e.value.clone(),
            })
            .collect();
        updates.sort_by_key(|u| u.version);
        for update in &updates {
            acked.insert((update.entity, update.value.key()), update.version);
        }
        updates
    }

    /// Forget what `peer` has seen; the next collect resends current state
    pub fn forget_peer(&mut self, peer: PeerId) {
        self.acked.remove(&peer);
    }

    pub fn remove_entity(&mut self, entity: EntityId) {
        self.entries.retain(|(e, _), _| *e != entity);
        for acked in self.acked.values_mut() {
            acked.retain(|(e, _), _| *e != entity);
        }
    }

    pub fn field_count(&self) -> usize {
        self.entries.len()
    }
}

/// Publishes resolved trace endpoints to observers for presentation
pub struct CosmeticReplicator;

impl CosmeticReplicator {
    /// Record `endpoint` on the weapon and replicate it on the wielder to
    /// every peer except the originator. Returns true if anything was sent.
    pub fn publish(
        replication: &mut ReplicationServer,
        weapon: &mut WeaponInstance,
        wielder: EntityId,
        originator: Option<PeerId>,
        endpoint: Vec3,
    ) -> bool {
        if !weapon.set_cosmetic_trace_endpoint(endpoint) {
            return false;
        }
        let recipients = originator.map_or(Recipients::All, Recipients::AllExcept);
        replication.write(wielder, FieldValue::CosmeticTraceEndpoint(endpoint), recipients)
    }
}
