//! Cisco Secure Client control
//!
//! The `vpn` command line client prints its progress as `>> state: ...` and
//! `>> notice: ...` lines, localized to the system language. Only the last
//! line of each kind matters.

use std::path::PathBuf;

use async_trait::async_trait;

use cs_core::config::AgentConfig;

use crate::command;
use crate::error::{Result, TunnelError};

/// Default location of the Cisco Secure Client CLI
pub const VPN_CLI_PATH: &str = "/opt/cisco/secureclient/bin/vpn";

const STATE_PREFIX: &str = ">> state: ";
const NOTICE_PREFIX: &str = ">> notice: ";

/// Connection state reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpnState {
    Connected,
    Disconnected,
    Unknown,
}

impl VpnState {
    fn from_label(label: &str) -> Self {
        match label {
            "Connected" | "Подключено" => VpnState::Connected,
            "Disconnected" | "Отключено" => VpnState::Disconnected,
            _ => VpnState::Unknown,
        }
    }
}

/// Last notice printed by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpnNotice {
    ReadyForConnect,
    Unknown,
}

impl VpnNotice {
    fn from_label(label: &str) -> Self {
        match label {
            "Ready to connect." | "Готово к подключению." => VpnNotice::ReadyForConnect,
            _ => VpnNotice::Unknown,
        }
    }
}

fn last_value<'a>(output: &'a str, prefix: &str) -> Option<&'a str> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(prefix))
        .last()
}

/// State from the last `>> state:` line of client output
pub fn parse_state(output: &str) -> VpnState {
    last_value(output, STATE_PREFIX)
        .map(VpnState::from_label)
        .unwrap_or(VpnState::Unknown)
}

/// Notice from the last `>> notice:` line of client output
pub fn parse_notice(output: &str) -> VpnNotice {
    last_value(output, NOTICE_PREFIX)
        .map(VpnNotice::from_label)
        .unwrap_or(VpnNotice::Unknown)
}

/// VPN session management
#[async_trait]
pub trait VpnClient: Send + Sync {
    async fn state(&self) -> Result<(VpnState, VpnNotice)>;

    /// Connect and confirm the session is up
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// [`VpnClient`] backed by the Cisco Secure Client CLI
#[derive(Debug, Clone)]
pub struct CiscoVpn {
    binary: PathBuf,
    host: String,
    username: String,
    password: String,
}

impl CiscoVpn {
    pub fn new(host: String, username: String, password: String) -> Self {
        Self {
            binary: PathBuf::from(VPN_CLI_PATH),
            host,
            username,
            password,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.vpn_host.clone(),
            config.vpn_username.clone(),
            config.vpn_password.clone(),
        )
    }

    /// Use a client binary at a non-default path
    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = binary;
        self
    }

    fn program(&self) -> String {
        self.binary.to_string_lossy().into_owned()
    }
}

#[async_trait]
impl VpnClient for CiscoVpn {
    async fn state(&self) -> Result<(VpnState, VpnNotice)> {
        let program = self.program();
        let out = command::run(&program, &["-s", "state"], None)
            .await?
            .check(&program)?;
        Ok((parse_state(&out.text), parse_notice(&out.text)))
    }

    async fn connect(&self) -> Result<()> {
        let program = self.program();
        let credentials = format!("{}\n{}\ny\n", self.username, self.password);
        let out = command::run(&program, &["-s", "connect", &self.host], Some(&credentials))
            .await?
            .check(&program)?;

        if parse_state(&out.text) != VpnState::Connected {
            return Err(TunnelError::NotConnected(out.text.trim().to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let program = self.program();
        command::run(&program, &["-s", "disconnect"], None)
            .await?
            .check(&program)?;
        Ok(())
    }
}
