//! Tunnel agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ControlLoopConfig;
use crate::error::ConfigError;

/// Configuration for the cisco-socks5 agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// VPN profile or host passed to the VPN client
    pub vpn_host: String,

    /// VPN username
    pub vpn_username: String,

    /// VPN password
    pub vpn_password: String,

    /// Local account the SOCKS tunnel logs into
    pub local_username: String,

    /// Local sudo password (used to toggle the packet filter)
    pub local_password: String,

    /// Host the SSH tunnel connects to
    pub local_host: String,

    /// Bind address of the SOCKS listener (`ssh -D`)
    pub tunnel_address: String,

    /// SSH directory (defaults to ~/.ssh)
    pub ssh_dir: Option<PathBuf>,

    /// Control loop tuning
    pub control_loop: ControlLoopConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            vpn_host: String::new(),
            vpn_username: String::new(),
            vpn_password: String::new(),
            local_username: String::new(),
            local_password: String::new(),
            local_host: "127.0.0.1".to_string(),
            tunnel_address: "127.0.0.1:8000".to_string(),
            ssh_dir: None,
            control_loop: ControlLoopConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Check that every required field is set and the tuning is sane
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("vpn_host", &self.vpn_host),
            ("vpn_username", &self.vpn_username),
            ("vpn_password", &self.vpn_password),
            ("local_username", &self.local_username),
            ("local_password", &self.local_password),
            ("local_host", &self.local_host),
            ("tunnel_address", &self.tunnel_address),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(name.to_string()));
            }
        }

        self.control_loop.validate()
    }

    /// Resolved SSH directory
    pub fn ssh_dir(&self) -> PathBuf {
        self.ssh_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
        })
    }
}
