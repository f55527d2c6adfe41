//! Core error types for cisco-socks5

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ObjectKey;

/// Errors returned by resource storage
///
/// Neither variant is fatal: `KeyNotExist` means "skip", `AlreadyUpdated`
/// means "re-fetch and retry".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The resource is no longer present in storage
    #[error("Key does not exist: {0}")]
    KeyNotExist(ObjectKey),

    /// A newer generation was committed while the caller held its copy
    #[error("Resource {key} already updated: stored generation {stored}, incoming {incoming}")]
    AlreadyUpdated {
        key: ObjectKey,
        stored: u64,
        incoming: u64,
    },
}

impl StorageError {
    /// Whether this is an optimistic-concurrency conflict
    pub fn is_already_updated(&self) -> bool {
        matches!(self, StorageError::AlreadyUpdated { .. })
    }

    /// Whether the targeted resource was removed
    pub fn is_key_not_exist(&self) -> bool {
        matches!(self, StorageError::KeyNotExist(_))
    }

    /// Key of the resource the failed operation targeted
    pub fn key(&self) -> &ObjectKey {
        match self {
            StorageError::KeyNotExist(key) => key,
            StorageError::AlreadyUpdated { key, .. } => key,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
