//! Configuration management for the earbud controller.
//!
//! This module handles loading and saving configuration from disk,
//! including the device address and link parameters.

use std::{env, fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{BudsError, Result};

/// Main configuration structure for the controller.
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
   /// MAC address of the earbuds; prompted for interactively when unset.
   #[serde(default)]
   pub device_address: Option<String>,

   #[serde(default = "default_channel")]
   pub channel: u8,

   #[serde(default = "default_response_timeout_ms")]
   pub response_timeout_ms: u64,
}

const fn default_channel() -> u8 {
   1
}

const fn default_response_timeout_ms() -> u64 {
   2000
}

impl Default for Config {
   fn default() -> Self {
      Self {
         device_address: None,
         channel: default_channel(),
         response_timeout_ms: default_response_timeout_ms(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      // Ensure directory exists
      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(budctl_home) = env::var("BUDCTL_HOME") {
         PathBuf::from(budctl_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(BudsError::ConfigDirNotFound);
      };

      Ok(config_dir.join("budctl").join("config.toml"))
   }

   pub const fn response_timeout(&self) -> Duration {
      Duration::from_millis(self.response_timeout_ms)
   }
}
