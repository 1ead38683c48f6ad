//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::registry::MAX_PLAYERS_PER_ROOM;
use crate::game::RoomSettings;
use crate::util::rate_limit::INPUT_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated; `*` allows any
    pub client_origin: String,

    /// Capacity enforced on join
    pub max_players_per_room: usize,
    /// Max inbound messages per second per connection
    pub input_rate_limit: u32,
    /// Tick, broadcast and round tunables handed to every new room
    pub room: RoomSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR when both are set
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string())
        };

        let defaults = RoomSettings::default();
        let room = RoomSettings {
            tick_rate: parse_or("TICK_RATE", defaults.tick_rate)?,
            network_update_rate: parse_or("NETWORK_UPDATE_RATE", defaults.network_update_rate)?,
            round_seconds: parse_or("ROUND_SECONDS", defaults.round_seconds)?,
            ..defaults
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(server_addr.clone()))?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            max_players_per_room: parse_or("MAX_PLAYERS_PER_ROOM", MAX_PLAYERS_PER_ROOM)?,
            input_rate_limit: parse_or("INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?,
            room,
        })
    }
}

/// Read a numeric variable, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1:?}")]
    Invalid(&'static str, String),

    #[error("Invalid server address format: {0}")]
    InvalidAddress(String),
}
