//! Error types for the light relay service.
//!
//! This module defines all error types that can occur while driving the
//! light, including Bluetooth, D-Bus, configuration and session lifecycle
//! errors.

use smol_str::SmolStr;
use thiserror::Error;

/// Main error type for the light relay service.
#[derive(Error, Debug)]
pub enum LightError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Device not found: {0}")]
   DeviceNotFound(SmolStr),

   #[error("Device not connected")]
   DeviceNotConnected,

   #[error("Connection error: {0}")]
   Connection(String),

   #[error("Characteristic resolution failed: {0}")]
   CharacteristicResolution(String),

   #[error("Notify subscription failed: {0}")]
   Subscription(String),

   #[error("Write failed: {0}")]
   Write(String),

   #[error("Channel handle belongs to a closed link")]
   StaleChannel,

   #[error("Connection closed")]
   ConnectionClosed,

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Operation cancelled by shutdown")]
   Cancelled,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Adapter not available: {0}")]
   AdapterNotAvailable(SmolStr),
}

impl LightError {
   /// Errors after which reconnecting to the same device cannot succeed
   /// without outside intervention (firmware or profile mismatch).
   pub const fn is_fatal(&self) -> bool {
      matches!(self, Self::CharacteristicResolution(_))
   }
}

/// Convenience type alias for Results with `LightError`.
pub type Result<T> = std::result::Result<T, LightError>;
