//! Arena combat server
//!
//! Server-authoritative weapon fire, hit resolution and health, with
//! field-level replication to proxy clients over WebSocket.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;

pub use game::{EntityId, PeerId};
