//! Reconciliation of the agent's [`MainConfig`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cs_controlloop::{Reconcile, ReconcileContext, ReconcileResult, ResourceObject};

use crate::api::{condition, reason, MainConfig};
use crate::firewall::Firewall;
use crate::tunnel::TunnelService;
use crate::vpn::{VpnClient, VpnState};

/// Delay before checking a freshly started VPN session
const VPN_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Health check period once everything is up
const RESYNC_PERIOD: Duration = Duration::from_secs(20);

/// Brings up VPN, firewall and tunnel in order; tears them down on kill
pub struct MainReconcile {
    vpn: Arc<dyn VpnClient>,
    firewall: Arc<dyn Firewall>,
    tunnel: TunnelService,
}

impl MainReconcile {
    pub fn new(vpn: Arc<dyn VpnClient>, firewall: Arc<dyn Firewall>, tunnel: TunnelService) -> Self {
        Self {
            vpn,
            firewall,
            tunnel,
        }
    }

    async fn reconcile_normal(&self, config: &mut MainConfig) -> anyhow::Result<ReconcileResult> {
        let (state, _) = match self.vpn.state().await {
            Ok(state) => state,
            Err(e) => {
                config.mark_false(
                    condition::VPN_CONNECTED,
                    reason::VPN_CONNECTION_STATE_FAILED,
                    &e.to_string(),
                );
                return Err(e.into());
            }
        };

        if state != VpnState::Connected {
            tracing::info!("Connecting to VPN...");
            if let Err(e) = self.vpn.connect().await {
                config.mark_false(
                    condition::VPN_CONNECTED,
                    reason::VPN_CONNECTION_FAILED,
                    &e.to_string(),
                );
                return Err(e.into());
            }
            tracing::info!("VPN connected");
            return Ok(ReconcileResult::requeue_after(VPN_SETTLE_DELAY));
        }
        config.mark_true(condition::VPN_CONNECTED);

        if let Err(e) = self.firewall.disable().await {
            config.mark_false(
                condition::PF_DISABLED,
                reason::PF_DISABLED_FAILED,
                &e.to_string(),
            );
            return Err(e.into());
        }
        config.mark_true(condition::PF_DISABLED);

        if let Err(e) = self.tunnel.start_tunnel().await {
            config.mark_false(
                condition::TUNNEL_ENABLED,
                reason::TUNNEL_INITIALIZATION_FAILED,
                &e.to_string(),
            );
            return Err(e.into());
        }
        config.mark_true(condition::TUNNEL_ENABLED);

        Ok(ReconcileResult::requeue_after(RESYNC_PERIOD))
    }

    async fn reconcile_kill(&self, config: &mut MainConfig) -> anyhow::Result<ReconcileResult> {
        tracing::info!("Tearing down tunnel and VPN");

        let pid = match self.tunnel.tunnel_pid().await {
            Ok(pid) => pid,
            Err(e) => {
                config.mark_false(
                    condition::TUNNEL_ENABLED,
                    reason::TUNNEL_DISABLING_FAILED,
                    &e.to_string(),
                );
                return Err(e.into());
            }
        };

        if let Some(pid) = pid {
            if let Err(e) = self.tunnel.stop_tunnel(pid).await {
                config.mark_false(
                    condition::TUNNEL_ENABLED,
                    reason::TUNNEL_DISABLING_FAILED,
                    &e.to_string(),
                );
                return Err(e.into());
            }
            tracing::info!("Stopped tunnel process {}", pid);
        }

        let (state, _) = self.vpn.state().await?;
        if state == VpnState::Connected {
            if let Err(e) = self.vpn.disconnect().await {
                config.mark_false(
                    condition::VPN_CONNECTED,
                    reason::VPN_DISCONNECT_FAILED,
                    &e.to_string(),
                );
                return Err(e.into());
            }
            tracing::info!("VPN disconnected");
        }

        tracing::info!("Teardown complete");
        Ok(ReconcileResult::done())
    }
}

#[async_trait]
impl Reconcile<MainConfig> for MainReconcile {
    async fn reconcile(
        &self,
        _ctx: &ReconcileContext,
        config: &mut MainConfig,
    ) -> anyhow::Result<ReconcileResult> {
        if config.kill_timestamp().is_some() {
            self.reconcile_kill(config).await
        } else {
            self.reconcile_normal(config).await
        }
    }
}
