//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::r#match::MatchSettings;
use crate::game::{Rules, ServerSettings};
use crate::util::time::{DEFAULT_SNAPSHOT_RATE, DEFAULT_TICK_RATE};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Snapshots broadcast per second
    pub snapshot_rate: u32,
    /// How far back hit validation may rewind
    pub history: Duration,
    pub wait_for_players: Duration,
    pub match_duration: Duration,
    pub respawn: Duration,
    pub min_players: usize,
    pub max_players: usize,
    /// Client-side render delay, added to rewind latency
    pub interp_delay: Duration,
    /// Seed for spawn selection
    pub sim_seed: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset variables take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let var = |name: &'static str, default: u64| parse_var(&lookup, name, default);

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(server_addr.clone()))?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),

            tick_rate: parse_var(&lookup, "TICK_RATE", DEFAULT_TICK_RATE)?,
            snapshot_rate: parse_var(&lookup, "SNAPSHOT_RATE", DEFAULT_SNAPSHOT_RATE)?,
            history: Duration::from_millis(var("HISTORY_MS", 1000)?),
            wait_for_players: Duration::from_secs(var("WAIT_FOR_PLAYERS_SECS", 15)?),
            match_duration: Duration::from_secs(var("MATCH_DURATION_SECS", 120)?),
            respawn: Duration::from_secs(var("RESPAWN_SECS", 3)?),
            min_players: parse_var(&lookup, "MIN_PLAYERS", 1)?,
            max_players: parse_var(&lookup, "MAX_PLAYERS", 16)?,
            interp_delay: Duration::from_millis(var("INTERP_DELAY_MS", 100)?),
            sim_seed: var("SIM_SEED", 0x5eed)?,
        })
    }

    /// Simulation knobs derived from this configuration
    pub fn server_settings(&self) -> ServerSettings {
        let rules = Rules::new(self.tick_rate).with_respawn(self.respawn);
        let mut settings = ServerSettings::new(rules).with_history(self.history);
        settings.match_settings = MatchSettings {
            wait_for_players: self.wait_for_players,
            match_duration: self.match_duration,
            min_players: self.min_players,
        };
        settings
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var: name, value }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for environment variable {var}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid server address format: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.snapshot_rate, 20);
        assert_eq!(config.wait_for_players, Duration::from_secs(15));
        assert_eq!(config.match_duration, Duration::from_secs(120));

        let settings = config.server_settings();
        assert_eq!(settings.history_depth, 60);
        assert_eq!(settings.rules.respawn_ticks, 180);
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = config(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = config(&[("TICK_RATE", "fast")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "TICK_RATE", .. }));
        assert!(matches!(
            config(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress(_))
        ));
    }
}
