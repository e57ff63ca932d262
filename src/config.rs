use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use crate::buffer::DEFAULT_CAPACITY;
use crate::error::ConfigError;
use crate::fit::FitConfig;
use crate::notify::DEFAULT_NOTIFICATION_CAPACITY;
use crate::parser::WireGrammar;

pub const DEFAULT_PORT: u16 = 5554;
pub const DEFAULT_WINDOW_LEN: usize = 100;
pub const DEFAULT_MAX_DATAGRAM: usize = 2048;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // ── Socket ──
    pub bind_addr: IpAddr,
    pub port: u16,
    pub max_datagram_size: usize,

    // ── Wire format ──
    /// Device speaks the `@`-delimited Edisson format instead of tagged CSV
    pub is_edisson: bool,

    // ── Buffering ──
    pub window_len: usize,
    pub buffer_capacity: usize,
    pub notification_capacity: usize,

    // ── Fitting ──
    pub fit: FitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_datagram_size: DEFAULT_MAX_DATAGRAM,
            is_edisson: false,
            window_len: DEFAULT_WINDOW_LEN,
            buffer_capacity: DEFAULT_CAPACITY,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            fit: FitConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn grammar(&self) -> WireGrammar {
        WireGrammar::from_is_edisson(self.is_edisson)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in 1-65535".into()));
        }
        if self.window_len == 0 {
            return Err(ConfigError::Invalid("window_len must be at least 1".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_capacity must be at least 1".into()));
        }
        if self.window_len > self.buffer_capacity {
            log::warn!(
                "window_len {} exceeds buffer_capacity {}; windows will be capped at {}",
                self.window_len,
                self.buffer_capacity,
                self.buffer_capacity
            );
        }
        if self.max_datagram_size == 0 {
            return Err(ConfigError::Invalid("max_datagram_size must be at least 1".into()));
        }
        if self.fit.max_iterations == 0 {
            return Err(ConfigError::Invalid("fit.max_iterations must be at least 1".into()));
        }
        if !(self.fit.tolerance > 0.0 && self.fit.tolerance.is_finite()) {
            return Err(ConfigError::Invalid("fit.tolerance must be positive".into()));
        }
        Ok(())
    }
}
