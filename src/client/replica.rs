//! Last-value-wins store of replicated fields

use std::collections::HashMap;

use glam::Vec3;

use crate::game::combat::WeaponIdentity;
use crate::game::snapshot::{FieldKey, FieldUpdate, FieldValue};
use crate::game::EntityId;

#[derive(Debug, Clone, Default)]
pub struct ReplicaStore {
    fields: HashMap<(EntityId, FieldKey), (u64, FieldValue)>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update if it is newer than what we hold. Stale and
    /// duplicate deliveries return false.
    pub fn apply(&mut self, update: &FieldUpdate) -> bool {
        let key = (update.entity, update.value.key());
        match self.fields.get(&key) {
            Some((version, _)) if *version >= update.version => false,
            _ => {
                self.fields
                    .insert(key, (update.version, update.value.clone()));
                true
            }
        }
    }

    pub fn get(&self, entity: EntityId, key: FieldKey) -> Option<&FieldValue> {
        self.fields.get(&(entity, key)).map(|(_, v)| v)
    }

    pub fn health(&self, entity: EntityId) -> Option<f32> {
        match self.get(entity, FieldKey::CurrentHealth)? {
            FieldValue::CurrentHealth(h) => Some(*h),
            _ => None,
        }
    }

    pub fn died(&self, entity: EntityId) -> bool {
        matches!(self.get(entity, FieldKey::Died), Some(FieldValue::Died(true)))
    }

    pub fn trace_endpoint(&self, entity: EntityId) -> Option<Vec3> {
        match self.get(entity, FieldKey::CosmeticTraceEndpoint)? {
            FieldValue::CosmeticTraceEndpoint(p) => Some(*p),
            _ => None,
        }
    }

    pub fn equipped(&self, entity: EntityId) -> Option<&WeaponIdentity> {
        match self.get(entity, FieldKey::EquippedWeapon)? {
            FieldValue::EquippedWeapon(w) => w.as_ref(),
            _ => None,
        }
    }

    pub fn remove_entity(&mut self, entity: EntityId) {
        self.fields.retain(|(e, _), _| *e != entity);
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}
