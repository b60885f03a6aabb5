//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::authority::CombatAction;
use crate::game::health::HealthChanged;
use crate::game::snapshot::FieldUpdate;
use crate::game::{EntityId, PeerId};

/// Largest inbound text frame accepted from a client
pub const MAX_MESSAGE_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Spawn a combatant (also used to respawn after removal)
    Join {
        #[serde(default)]
        name: Option<String>,
    },

    /// Client-reported eye point and aim direction
    Aim { eye: Vec3, direction: Vec3 },

    /// Begin continuous fire
    StartFire,

    /// Release the trigger
    StopFire,

    Reload,

    /// Switch to a loadout slot
    Equip { slot: usize },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Ask for the full replicated state again
    Resync,

    Leave,
}

impl ClientMsg {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::TooLarge(text.len()));
        }
        Ok(serde_json::from_str(text)?)
    }

    /// The combat intent carried by this message, if any
    pub fn as_action(&self) -> Option<CombatAction> {
        match self {
            ClientMsg::StartFire => Some(CombatAction::StartFire),
            ClientMsg::StopFire => Some(CombatAction::StopFire),
            ClientMsg::Reload => Some(CombatAction::Reload),
            ClientMsg::Equip { slot } => Some(CombatAction::Equip { slot: *slot }),
            _ => None,
        }
    }

    pub fn from_action(action: CombatAction) -> Self {
        match action {
            CombatAction::StartFire => ClientMsg::StartFire,
            CombatAction::StopFire => ClientMsg::StopFire,
            CombatAction::Reload => ClientMsg::Reload,
            CombatAction::Equip { slot } => ClientMsg::Equip { slot },
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { peer_id: PeerId, server_time: u64 },

    /// Confirmation of join, sent to the joining peer only
    Joined {
        entity: EntityId,
        loadout: Vec<String>,
        /// All combatants at join time, including the new one
        combatants: Vec<CombatantInfo>,
    },

    CombatantJoined { combatant: CombatantInfo },

    /// Versioned field values the peer has not seen yet
    Replicate { updates: Vec<FieldUpdate> },

    HealthChanged {
        entity: EntityId,
        change: HealthChanged,
    },

    ProjectileLaunched {
        projectile: EntityId,
        owner: EntityId,
        origin: Vec3,
        velocity: Vec3,
    },

    ProjectileImpact {
        projectile: EntityId,
        point: Vec3,
        target: Option<EntityId>,
    },

    /// Combatant left or its removal grace expired
    Removed { entity: EntityId },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Public info about a combatant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantInfo {
    pub entity: EntityId,
    pub peer_id: Option<PeerId>,
    pub name: String,
    pub max_health: f32,
}
