//! Proxy-side model of a connected client

pub mod proxy;
pub mod replica;

pub use proxy::{EffectPresenter, ProxyPeer};
pub use replica::ReplicaStore;
