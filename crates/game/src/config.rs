use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::components::DEFAULT_PLAYER_SPEED;
use crate::net::{DEFAULT_NETWORK_RATE, DEFAULT_PORT, TransportConfig};
use crate::world::MAX_MAPS;

pub const GAME_TIMESTEP: f32 = 1.0 / 100.0;
pub const DEFAULT_MAP: &str = "arena";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn check_rates(time_step: f32, network_rate: f32, packet_loss: f32) -> Result<(), ConfigError> {
    if !(time_step > 0.0) {
        return Err(ConfigError::Invalid(format!("time_step must be positive, got {time_step}")));
    }
    if !(network_rate > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "network_rate must be positive, got {network_rate}"
        )));
    }
    if !(0.0..=1.0).contains(&packet_loss) {
        return Err(ConfigError::Invalid(format!(
            "packet_loss must be within 0..=1, got {packet_loss}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds per simulation tick.
    pub time_step: f32,
    /// Seconds between object update broadcasts.
    pub network_rate: f32,
    pub port: u16,
    pub max_peers: usize,
    pub player_speed: f32,
    /// Map new players join when they do not name a known one.
    pub map_name: String,
    /// Further maps clients may ask for. Nothing else is ever opened.
    pub maps: Vec<String>,
    pub fake_lag_ms: u64,
    pub packet_loss: f32,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            time_step: GAME_TIMESTEP,
            network_rate: DEFAULT_NETWORK_RATE,
            port: DEFAULT_PORT,
            max_peers: 32,
            player_speed: DEFAULT_PLAYER_SPEED,
            map_name: DEFAULT_MAP.to_string(),
            maps: Vec::new(),
            fake_lag_ms: 0,
            packet_loss: 0.0,
            timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rates(self.time_step, self.network_rate, self.packet_loss)?;
        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be at least 1".into()));
        }
        if self.map_name.is_empty() {
            return Err(ConfigError::Invalid("map_name must not be empty".into()));
        }
        if self.maps.len() >= MAX_MAPS {
            return Err(ConfigError::Invalid(format!(
                "at most {} extra maps, got {}",
                MAX_MAPS - 1,
                self.maps.len()
            )));
        }
        Ok(())
    }

    /// The default map followed by the extra ones.
    pub fn map_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.map_name.as_str()).chain(self.maps.iter().map(String::as_str))
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            network_rate: self.network_rate,
            fake_lag: Duration::from_millis(self.fake_lag_ms),
            packet_loss: self.packet_loss,
            max_peers: self.max_peers,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub time_step: f32,
    pub network_rate: f32,
    /// `host:port` of the server to join.
    pub server_addr: String,
    pub player_speed: f32,
    pub map_name: String,
    pub fake_lag_ms: u64,
    pub packet_loss: f32,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            time_step: GAME_TIMESTEP,
            network_rate: DEFAULT_NETWORK_RATE,
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            player_speed: DEFAULT_PLAYER_SPEED,
            map_name: DEFAULT_MAP.to_string(),
            fake_lag_ms: 0,
            packet_loss: 0.0,
            timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rates(self.time_step, self.network_rate, self.packet_loss)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            network_rate: self.network_rate,
            fake_lag: Duration::from_millis(self.fake_lag_ms),
            packet_loss: self.packet_loss,
            max_peers: 1,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
