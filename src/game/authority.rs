//! Split authority: who executes an action and what the authority admits

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::PeerId;

/// Role of the local peer for gameplay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Mutates gameplay state directly
    Authoritative,
    /// Forwards intents and waits for replicated results
    Proxy,
}

/// Combat intents a peer can issue for its own combatant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CombatAction {
    StartFire,
    StopFire,
    Reload,
    Equip { slot: usize },
}

/// Intent forwarded from a proxy. Carries nothing beyond the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRequest {
    pub sender: PeerId,
    pub action: CombatAction,
}

/// Where an action goes after the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Execute(CombatAction),
    Forward(ActionRequest),
}

/// Why the authority dropped a forwarded request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("only the authority admits requests")]
    NotAuthoritative,

    #[error("sender has no combatant")]
    UnknownSender,

    #[error("combatant no longer accepts input")]
    NotAlive,

    #[error("no weapon equipped")]
    NoWeapon,

    #[error("weapon cannot fire until reloaded")]
    OutOfAmmo,

    #[error("loadout slot {slot} out of range ({loadout} slots)")]
    InvalidSlot { slot: usize, loadout: usize },
}

/// Authority-side view of the sender's combatant at admission time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionContext {
    pub has_combatant: bool,
    pub accepts_input: bool,
    pub weapon_equipped: bool,
    pub can_fire: bool,
    pub loadout_len: usize,
}

impl AdmissionContext {
    /// Context for a sender that controls nothing
    pub fn unknown() -> Self {
        Self {
            has_combatant: false,
            accepts_input: false,
            weapon_equipped: false,
            can_fire: false,
            loadout_len: 0,
        }
    }
}

/// Policy applied to every forwarded request before it reaches the pipeline
pub trait ValidationPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, request: &ActionRequest, ctx: &AdmissionContext) -> Result<(), Rejection>;
}

/// Admits everything. Rate and ammo are still enforced by the weapon itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ValidationPolicy for AcceptAll {
    fn name(&self) -> &'static str {
        "accept_all"
    }

    fn validate(&self, _request: &ActionRequest, _ctx: &AdmissionContext) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Re-checks the sender's weapon state on the authority
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictPolicy;

impl ValidationPolicy for StrictPolicy {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn validate(&self, request: &ActionRequest, ctx: &AdmissionContext) -> Result<(), Rejection> {
        match request.action {
            CombatAction::StartFire => {
                if !ctx.weapon_equipped {
                    return Err(Rejection::NoWeapon);
                }
                if !ctx.can_fire {
                    return Err(Rejection::OutOfAmmo);
                }
                Ok(())
            }
            CombatAction::Reload if !ctx.weapon_equipped => Err(Rejection::NoWeapon),
            CombatAction::Equip { slot } if slot >= ctx.loadout_len => Err(Rejection::InvalidSlot {
                slot,
                loadout: ctx.loadout_len,
            }),
            _ => Ok(()),
        }
    }
}

/// Configured validation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    AcceptAll,
    Strict,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn ValidationPolicy> {
        match self {
            PolicyKind::AcceptAll => Box::new(AcceptAll),
            PolicyKind::Strict => Box::new(StrictPolicy),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept_all" | "accept-all" => Ok(PolicyKind::AcceptAll),
            "strict" => Ok(PolicyKind::Strict),
            other => Err(format!("unknown validation policy: {other}")),
        }
    }
}

/// Routes local intents by role and admits forwarded ones on the authority
pub struct AuthorityGate {
    role: Role,
    local_peer: PeerId,
    policy: Box<dyn ValidationPolicy>,
}

impl AuthorityGate {
    pub fn new(role: Role, local_peer: PeerId, policy: Box<dyn ValidationPolicy>) -> Self {
        Self {
            role,
            local_peer,
            policy,
        }
    }

    pub fn authoritative(local_peer: PeerId, policy: Box<dyn ValidationPolicy>) -> Self {
        Self::new(Role::Authoritative, local_peer, policy)
    }

    /// Proxies never validate, so they carry the default policy
    pub fn proxy(local_peer: PeerId) -> Self {
        Self::new(Role::Proxy, local_peer, Box::new(AcceptAll))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn is_authoritative(&self) -> bool {
        self.role == Role::Authoritative
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Execute locally on the authority, otherwise package for forwarding
    pub fn route(&self, action: CombatAction) -> Routing {
        match self.role {
            Role::Authoritative => Routing::Execute(action),
            Role::Proxy => Routing::Forward(ActionRequest {
                sender: self.local_peer,
                action,
            }),
        }
    }

    /// Admit a forwarded request. Liveness is checked regardless of policy.
    pub fn admit(
        &self,
        request: &ActionRequest,
        ctx: &AdmissionContext,
    ) -> Result<CombatAction, Rejection> {
        let result = self.check(request, ctx);
        if let Err(reason) = &result {
            debug!(
                peer_id = %request.sender,
                action = ?request.action,
                policy = self.policy.name(),
                %reason,
                "Request rejected"
            );
        }
        result.map(|()| request.action)
    }

    fn check(&self, request: &ActionRequest, ctx: &AdmissionContext) -> Result<(), Rejection> {
        if self.role != Role::Authoritative {
            return Err(Rejection::NotAuthoritative);
        }
        if !ctx.has_combatant {
            return Err(Rejection::UnknownSender);
        }
        if !ctx.accepts_input {
            return Err(Rejection::NotAlive);
        }
        self.policy.validate(request, ctx)
    }
}

impl fmt::Debug for AuthorityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityGate")
            .field("role", &self.role)
            .field("local_peer", &self.local_peer)
            .field("policy", &self.policy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: PeerId = PeerId::from_u128(7);

    fn ready() -> AdmissionContext {
        AdmissionContext {
            has_combatant: true,
            accepts_input: true,
            weapon_equipped: true,
            can_fire: true,
            loadout_len: 2,
        }
    }

    fn request(action: CombatAction) -> ActionRequest {
        ActionRequest { sender: PEER, action }
    }

    #[test]
    fn test_authority_executes_locally() {
        let gate = AuthorityGate::authoritative(PEER, Box::new(AcceptAll));
        assert_eq!(gate.route(CombatAction::StartFire), Routing::Execute(CombatAction::StartFire));
    }

    #[test]
    fn test_proxy_forwards_with_sender() {
        let gate = AuthorityGate::proxy(PEER);
        assert_eq!(
            gate.route(CombatAction::Reload),
            Routing::Forward(request(CombatAction::Reload))
        );
    }

    #[test]
    fn test_proxy_cannot_admit() {
        let gate = AuthorityGate::proxy(PEER);
        assert_eq!(
            gate.admit(&request(CombatAction::StartFire), &ready()),
            Err(Rejection::NotAuthoritative)
        );
    }

    #[test]
    fn test_accept_all_admits_empty_weapon() {
        let gate = AuthorityGate::authoritative(PEER, Box::new(AcceptAll));
        let ctx = AdmissionContext { can_fire: false, weapon_equipped: false, ..ready() };
        assert_eq!(
            gate.admit(&request(CombatAction::StartFire), &ctx),
            Ok(CombatAction::StartFire)
        );
    }

    #[test]
    fn test_dying_rejected_under_any_policy() {
        let ctx = AdmissionContext { accepts_input: false, ..ready() };
        for kind in [PolicyKind::AcceptAll, PolicyKind::Strict] {
            let gate = AuthorityGate::authoritative(PEER, kind.build());
            assert_eq!(
                gate.admit(&request(CombatAction::Reload), &ctx),
                Err(Rejection::NotAlive)
            );
        }
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let gate = AuthorityGate::authoritative(PEER, Box::new(AcceptAll));
        assert_eq!(
            gate.admit(&request(CombatAction::StopFire), &AdmissionContext::unknown()),
            Err(Rejection::UnknownSender)
        );
    }

    #[test]
    fn test_strict_rechecks_weapon_state() {
        let gate = AuthorityGate::authoritative(PEER, Box::new(StrictPolicy));
        let empty = AdmissionContext { can_fire: false, ..ready() };
        assert_eq!(
            gate.admit(&request(CombatAction::StartFire), &empty),
            Err(Rejection::OutOfAmmo)
        );
        let unarmed = AdmissionContext { weapon_equipped: false, ..ready() };
        assert_eq!(
            gate.admit(&request(CombatAction::Reload), &unarmed),
            Err(Rejection::NoWeapon)
        );
        assert_eq!(
            gate.admit(&request(CombatAction::Equip { slot: 2 }), &ready()),
            Err(Rejection::InvalidSlot { slot: 2, loadout: 2 })
        );
        assert_eq!(
            gate.admit(&request(CombatAction::StopFire), &unarmed),
            Ok(CombatAction::StopFire)
        );
    }

    #[test]
    fn test_policy_kind_parse() {
        assert_eq!("strict".parse::<PolicyKind>(), Ok(PolicyKind::Strict));
        assert_eq!("ACCEPT_ALL".parse::<PolicyKind>(), Ok(PolicyKind::AcceptAll));
        assert!("lenient".parse::<PolicyKind>().is_err());
    }
}
