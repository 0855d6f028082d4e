//! Error types for the earbud controller.
//!
//! This module defines all error types that can occur while talking to the
//! device: frame codec failures, session state violations, command
//! construction errors, and transport/configuration failures.

use thiserror::Error;

/// Main error type for the earbud controller.
#[derive(Error, Debug)]
pub enum BudsError {
   #[error("Payload too large for a frame: {len} bytes (max 255)")]
   FrameTooLarge { len: usize },

   #[error("Malformed frame: {reason}")]
   Malformed { reason: &'static str },

   #[error("Not paired; run `pair` before issuing feature commands")]
   NotPaired,

   #[error("Already paired with this device")]
   AlreadyPaired,

   #[error("Invalid argument: {0}")]
   InvalidArgument(String),

   #[error("Unknown preset: {0}")]
   UnknownPreset(String),

   #[error("No response from device within the timeout")]
   ResponseTimeout,

   #[error("Transport error: {0}")]
   Transport(#[from] std::io::Error),

   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("Connection lost")]
   ConnectionLost,

   #[error("Session is closed")]
   SessionClosed,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `BudsError`.
pub type Result<T> = std::result::Result<T, BudsError>;
