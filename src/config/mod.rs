//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::arena::ArenaConfig;
use crate::game::authority::PolicyKind;
use crate::game::combat::WeaponSpec;
use crate::util::time::SIMULATION_TPS;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// HMAC secret for session tokens
    pub session_secret: String,
    /// Allowed client origins for CORS; empty allows any
    pub client_origins: Vec<String>,

    /// Spawn placement seed
    pub arena_seed: u64,
    /// Seconds between death and removal
    pub death_grace_secs: f64,
    pub max_health: f32,
    pub validation_policy: PolicyKind,
    /// Replication diffs per second
    pub replication_tps: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let session_secret =
            env::var("SESSION_SECRET").map_err(|_| ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.len() < 16 {
            return Err(ConfigError::Invalid("SESSION_SECRET"));
        }

        let death_grace_secs: f64 = parse_var("DEATH_GRACE_SECS", 10.0)?;
        if !death_grace_secs.is_finite() || death_grace_secs < 0.0 {
            return Err(ConfigError::Invalid("DEATH_GRACE_SECS"));
        }
        let max_health: f32 = parse_var("MAX_HEALTH", 100.0)?;
        if !max_health.is_finite() || max_health <= 0.0 {
            return Err(ConfigError::Invalid("MAX_HEALTH"));
        }
        let replication_tps: u32 = parse_var("REPLICATION_TPS", 20)?;
        if replication_tps == 0 || replication_tps > SIMULATION_TPS {
            return Err(ConfigError::Invalid("REPLICATION_TPS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_var("LOG_FORMAT", LogFormat::Text)?,

            session_secret,
            client_origins: env::var("CLIENT_ORIGIN")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            arena_seed: match env::var("ARENA_SEED") {
                Ok(v) => v.parse().map_err(|_| ConfigError::Invalid("ARENA_SEED"))?,
                Err(_) => rand::random(),
            },
            death_grace_secs,
            max_health,
            validation_policy: parse_var("VALIDATION_POLICY", PolicyKind::AcceptAll)?,
            replication_tps,
        })
    }

    pub fn arena_config(&self) -> ArenaConfig {
        ArenaConfig {
            seed: self.arena_seed,
            max_health: self.max_health,
            death_grace: self.death_grace_secs,
            policy: self.validation_policy,
            loadout: WeaponSpec::default_loadout(),
            replication_interval: (SIMULATION_TPS / self.replication_tps).max(1),
            ..ArenaConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_arena_config_cadence() {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            session_secret: "0123456789abcdef".to_string(),
            client_origins: vec![],
            arena_seed: 1,
            death_grace_secs: 10.0,
            max_health: 150.0,
            validation_policy: PolicyKind::Strict,
            replication_tps: 10,
        };
        let arena = config.arena_config();
        assert_eq!(arena.replication_interval, 3);
        assert_eq!(arena.max_health, 150.0);
        assert_eq!(arena.policy, PolicyKind::Strict);
        assert_eq!(arena.loadout.len(), 2);
    }
}
