//! cs-core: Shared types, errors and configuration for cisco-socks5
//!
//! This crate provides the identity and status types, error enums and
//! configuration structures used by the control loop and the tunnel agent.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{ConfigError, StorageError};
pub use types::{ConditionStatus, ObjectKey};
