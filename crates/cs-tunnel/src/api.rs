//! The agent's desired-state resource

use cs_controlloop::{Resource, ResourceObject};

/// Name of the single resource the agent registers
pub const MAIN_CONFIG_NAME: &str = "main";

/// Condition types reported on [`MainConfig`]
pub mod condition {
    pub const VPN_CONNECTED: &str = "VPNConnected";
    pub const PF_DISABLED: &str = "PFDisabled";
    pub const TUNNEL_ENABLED: &str = "TunnelEnabled";
}

/// Reasons attached to false conditions
pub mod reason {
    pub const VPN_CONNECTION_FAILED: &str = "VPNConnectionFailed";
    pub const VPN_CONNECTION_STATE_FAILED: &str = "VPNConnectionStateFailed";
    pub const VPN_DISCONNECT_FAILED: &str = "VPNDisconnectFailed";
    pub const PF_DISABLED_FAILED: &str = "PFDisabledFailed";
    pub const TUNNEL_INITIALIZATION_FAILED: &str = "TunnelInitializationFailed";
    pub const TUNNEL_DISABLING_FAILED: &str = "TunnelDisablingFailed";
}

/// Desired state carries no fields; everything comes from the agent config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainConfigSpec {}

/// VPN plus SOCKS tunnel, reconciled as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainConfig {
    pub resource: Resource,
    pub spec: MainConfigSpec,
}

impl MainConfig {
    pub fn new(name: &str) -> Self {
        Self {
            resource: Resource::new(name),
            spec: MainConfigSpec::default(),
        }
    }
}

impl Default for MainConfig {
    fn default() -> Self {
        Self::new(MAIN_CONFIG_NAME)
    }
}

impl ResourceObject for MainConfig {
    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn resource_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }
}
