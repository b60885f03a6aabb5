//! Combat simulation modules

pub mod ammo;
pub mod arena;
pub mod authority;
pub mod combat;
pub mod damage;
pub mod death;
pub mod fire_rate;
pub mod health;
pub mod hit;
pub mod physics;
pub mod scheduler;
pub mod snapshot;

pub use arena::{Arena, ArenaConfig, ArenaHandle, ArenaState, Outbound};
pub use authority::{AuthorityGate, CombatAction, Role};
pub use combat::{WeaponInstance, WeaponSpec};
pub use health::HealthState;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// Reference to a simulated entity (combatant, weapon, projectile, wall)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A connected participant. Each peer controls at most one combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message received from a peer's WebSocket
#[derive(Debug, Clone)]
pub struct PeerInput {
    pub peer: PeerId,
    pub msg: ClientMsg,
    pub received_at: u64,
}
