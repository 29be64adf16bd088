//! # Configuration
//!
//! TOML configuration for the `textcraft` binary. Every field has a default,
//! so a partial file (or none at all, via [`Config::default`]) is enough.
//!
//! ## Sections
//!
//! - [`WorldConfig`] - world name and sled directory
//! - [`ClockConfigSection`] - tick clock state, rate and drain cap
//! - [`CommandsConfig`] - substitution and script limits
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Example
//!
//! ```toml
//! [world]
//! name = "textcraft"
//! data_dir = "./data/world"
//!
//! [clock]
//! enabled = true
//! interval_ms = 1000
//!
//! [commands]
//! max_substitution_depth = 8
//!
//! [logging]
//! level = "info"
//! file = "textcraft.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::world::{ClockConfig, EngineLimits, WorldOptions};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub clock: ClockConfigSection,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldConfig {
    #[serde(default = "default_world_name")]
    pub name: String,
    /// sled directory holding the world.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Seed the standard world when the store is empty; otherwise refuse to run.
    #[serde(default = "default_true")]
    pub seed_if_empty: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            data_dir: default_data_dir(),
            seed_if_empty: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockConfigSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tick interval for newly seeded worlds; existing worlds keep their own.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_pending_drain")]
    pub max_pending_drain: usize,
}

impl Default for ClockConfigSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            max_pending_drain: default_max_pending_drain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandsConfig {
    #[serde(default = "default_substitution_depth")]
    pub max_substitution_depth: u8,
    #[serde(default = "default_script_length")]
    pub max_script_length: usize,
    #[serde(default = "default_script_actions")]
    pub max_script_actions: u16,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            max_substitution_depth: default_substitution_depth(),
            max_script_length: default_script_length(),
            max_script_actions: default_script_actions(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Overrides the `-v` derived level when set ("error" .. "trace").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_world_name() -> String {
    "textcraft".to_string()
}

fn default_data_dir() -> String {
    "./data/world".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_pending_drain() -> usize {
    16
}

fn default_substitution_depth() -> u8 {
    8
}

fn default_script_length() -> usize {
    512
}

fn default_script_actions() -> u16 {
    32
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.world.name.trim().is_empty() {
            return Err(anyhow!("world.name must not be empty"));
        }
        if self.clock.interval_ms == 0 {
            return Err(anyhow!("clock.interval_ms must be positive"));
        }
        if self.commands.max_substitution_depth == 0 {
            return Err(anyhow!("commands.max_substitution_depth must be at least 1"));
        }
        if let Some(level) = &self.logging.level {
            level
                .parse::<log::LevelFilter>()
                .map_err(|_| anyhow!("logging.level '{}' is not a log level", level))?;
        }
        Ok(())
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            max_substitution_depth: self.commands.max_substitution_depth,
            max_script_length: self.commands.max_script_length,
            max_script_actions: self.commands.max_script_actions,
        }
    }

    pub fn world_options(&self) -> WorldOptions {
        WorldOptions {
            name: self.world.name.clone(),
            limits: self.limits(),
            clock_interval_ms: self.clock.interval_ms,
        }
    }

    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            enabled: self.clock.enabled,
            max_pending_drain: self.clock.max_pending_drain,
        }
    }
}
