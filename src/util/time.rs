//! Time utilities for the combat simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Simulation time in seconds since the arena started
pub type SimTime = f64;

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Delta time of one simulation tick (in seconds)
pub fn tick_delta() -> SimTime {
    1.0 / SimTime::from(SIMULATION_TPS)
}

/// Monotonic simulation clock, advanced only by the owning tick loop.
///
/// Gameplay never reads wall time: cooldowns, timers and the death grace
/// interval are all measured against this clock, which keeps the arena
/// deterministic under test.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Advance by `dt` seconds. Negative or non-finite steps are ignored.
    pub fn advance(&mut self, dt: SimTime) -> SimTime {
        if dt.is_finite() && dt > 0.0 {
            self.now += dt;
        }
        self.now
    }
}
