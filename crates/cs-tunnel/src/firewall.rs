//! Packet filter control

use async_trait::async_trait;

use crate::command;
use crate::error::Result;

/// Local firewall that would block the SOCKS listener
#[async_trait]
pub trait Firewall: Send + Sync {
    /// Disable the firewall; already disabled counts as success
    async fn disable(&self) -> Result<()>;
}

/// macOS `pf`, toggled through `sudo pfctl`
#[derive(Debug, Clone)]
pub struct PacketFilter {
    sudo_password: String,
}

impl PacketFilter {
    pub fn new(sudo_password: String) -> Self {
        Self { sudo_password }
    }
}

fn already_disabled(output: &str) -> bool {
    output.contains("pf not enabled")
}

#[async_trait]
impl Firewall for PacketFilter {
    async fn disable(&self) -> Result<()> {
        let password = format!("{}\n", self.sudo_password);
        let out = command::run("sudo", &["-S", "pfctl", "-d"], Some(&password)).await?;
        if out.success() || already_disabled(&out.text) {
            return Ok(());
        }
        Err(out.into_error("sudo pfctl -d"))
    }
}
