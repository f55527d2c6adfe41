//! cs-tunnel: Keep a Cisco VPN session and a local SOCKS5 SSH tunnel up
//!
//! The agent models its desired state as a single [`MainConfig`] resource and
//! lets a [`cs_controlloop::ControlLoop`] drive [`MainReconcile`] against it.
//! Each external system sits behind a trait so the reconcile logic can be
//! exercised without a VPN client, `pfctl` or `ssh` on the machine.

pub mod api;
pub mod controller;
pub mod error;
pub mod firewall;
pub mod status;
pub mod tunnel;
pub mod vpn;

mod command;

pub use api::{MainConfig, MAIN_CONFIG_NAME};
pub use controller::MainReconcile;
pub use error::{Result, TunnelError};
pub use firewall::{Firewall, PacketFilter};
pub use status::StatusBoard;
pub use tunnel::{KeyStore, SshKeyStore, SshTunnel, TunnelProcess, TunnelService};
pub use vpn::{CiscoVpn, VpnClient, VpnNotice, VpnState};
