//! Configuration management for the light relay service.
//!
//! This module handles loading and saving configuration from disk,
//! including the target device name and connection retry parameters.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{LightError, Result};

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
   /// Advertised name used when a caller does not name a device.
   #[serde(default = "default_device_name")]
   pub device_name: String,

   /// BlueZ adapter to use, the default adapter when unset.
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub adapter: Option<String>,

   #[serde(default = "default_retry_count")]
   pub max_connect_tries: u32,

   #[serde(default = "default_retry_delay")]
   pub retry_delay_ms: u64,

   #[serde(default = "default_scan_timeout")]
   pub scan_timeout_sec: u64,

   #[serde(default = "default_connect_timeout")]
   pub connect_timeout_sec: u64,

   #[serde(default = "default_service_settle")]
   pub service_settle_ms: u64,

   #[serde(default = "default_connect_on_startup")]
   pub connect_on_startup: bool,
}

fn default_device_name() -> String {
   "ELK-BLEDDM".to_string()
}

const fn default_retry_count() -> u32 {
   5
}

const fn default_retry_delay() -> u64 {
   1000
}

const fn default_scan_timeout() -> u64 {
   10
}

const fn default_connect_timeout() -> u64 {
   30
}

const fn default_service_settle() -> u64 {
   1000
}

const fn default_connect_on_startup() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         device_name: default_device_name(),
         adapter: None,
         max_connect_tries: default_retry_count(),
         retry_delay_ms: default_retry_delay(),
         scan_timeout_sec: default_scan_timeout(),
         connect_timeout_sec: default_connect_timeout(),
         service_settle_ms: default_service_settle(),
         connect_on_startup: default_connect_on_startup(),
      }
   }
}

/// Retry and timeout parameters the session applies to every connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
   /// Discovery attempts; notify subscription gets twice as many.
   pub max_attempts: u32,
   pub retry_delay: Duration,
   pub scan_timeout: Duration,
   pub connect_timeout: Duration,
   /// Pause between characteristic resolution and subscription.
   pub settle_delay: Duration,
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(config_path: &Path) -> Result<Self> {
      if config_path.exists() {
         let contents = fs::read_to_string(config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save_to(config_path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, config_path: &Path) -> Result<()> {
      // Ensure directory exists
      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(relay_home) = env::var("LEDRELAY_HOME") {
         PathBuf::from(relay_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(LightError::ConfigDirNotFound);
      };

      Ok(config_dir.join("ledrelay").join("config.toml"))
   }

   pub fn connect_policy(&self) -> ConnectPolicy {
      ConnectPolicy {
         max_attempts: self.max_connect_tries.max(1),
         retry_delay: Duration::from_millis(self.retry_delay_ms),
         scan_timeout: Duration::from_secs(self.scan_timeout_sec),
         connect_timeout: Duration::from_secs(self.connect_timeout_sec),
         settle_delay: Duration::from_millis(self.service_settle_ms),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_partial_file_uses_defaults() {
      let config: Config = toml::from_str("device_name = \"Desk Lamp\"\nmax_connect_tries = 2\n")
         .expect("valid toml");

      assert_eq!(config.device_name, "Desk Lamp");
      assert_eq!(config.max_connect_tries, 2);
      assert_eq!(config.retry_delay_ms, 1000);
      assert_eq!(config.connect_timeout_sec, 30);
      assert!(config.adapter.is_none());
      assert!(config.connect_on_startup);
   }

   #[test]
   fn test_missing_file_writes_defaults() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("ledrelay").join("config.toml");

      let config = Config::load_from(&path).unwrap();
      assert_eq!(config, Config::default());
      assert!(path.exists());

      let mut edited = config.clone();
      edited.adapter = Some("hci1".into());
      edited.service_settle_ms = 0;
      edited.save_to(&path).unwrap();
      assert_eq!(Config::load_from(&path).unwrap(), edited);
   }

   #[test]
   fn test_connect_policy() {
      let config = Config {
         max_connect_tries: 0,
         retry_delay_ms: 250,
         ..Config::default()
      };
      let policy = config.connect_policy();

      // zero would make connect unable to ever scan
      assert_eq!(policy.max_attempts, 1);
      assert_eq!(policy.retry_delay, Duration::from_millis(250));
      assert_eq!(policy.scan_timeout, Duration::from_secs(10));
      assert_eq!(policy.settle_delay, Duration::from_secs(1));
   }
}
