//! cisco-socks5 agent
//!
//! Keeps a Cisco VPN session up and exposes it to the local machine as a
//! SOCKS5 proxy served by `ssh -D`. On Ctrl+C or SIGTERM the tunnel and the
//! VPN session are torn down before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cs_controlloop::{ConditionSink, ControlLoop, TracingLogger};
use cs_core::config::{self, AgentConfig};
use cs_tunnel::status::{log_condition, StatusBoard};
use cs_tunnel::{
    CiscoVpn, MainConfig, MainReconcile, PacketFilter, SshKeyStore, SshTunnel, TunnelService,
    MAIN_CONFIG_NAME,
};

#[derive(Parser)]
#[command(name = "cisco-socks5")]
#[command(about = "Keep a Cisco VPN up and share it through a local SOCKS5 proxy")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of reconcile workers (overrides the config file)
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    ensure_not_root()?;

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let mut config: AgentConfig = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    if let Some(concurrency) = args.concurrency {
        config.control_loop.concurrency = concurrency;
    }
    config.validate().context("Invalid configuration")?;

    let ssh_dir = config.ssh_dir();
    let tunnel = TunnelService::new(
        &ssh_dir,
        Arc::new(SshKeyStore::new(ssh_dir.clone())),
        Arc::new(SshTunnel::from_config(&config)),
    );
    let reconciler = MainReconcile::new(
        Arc::new(CiscoVpn::from_config(&config)),
        Arc::new(PacketFilter::new(config.local_password.clone())),
        tunnel,
    );

    let (sink, mut reports) = ConditionSink::channel(config.control_loop.condition_buffer);
    let control_loop = ControlLoop::builder(reconciler)
        .logger(Arc::new(TracingLogger))
        .from_config(&config.control_loop)
        .condition_sink(sink)
        .build();

    control_loop.storage().add(MainConfig::new(MAIN_CONFIG_NAME));
    control_loop.run();
    tracing::info!("cisco-socks5 started, SOCKS5 proxy on {}", config.tunnel_address);

    let observer = tokio::spawn(async move {
        let mut board = StatusBoard::new();
        while let Some(report) = reports.recv().await {
            for condition in board.apply(&report) {
                log_condition(&report.key, &condition);
            }
        }
    });

    wait_for_shutdown().await;

    tracing::info!("Stopping cisco-socks5...");
    control_loop.stop().await;

    // Dropping the loop closes the sink and ends the observer.
    drop(control_loop);
    if let Err(e) = observer.await {
        tracing::warn!("Status observer failed: {}", e);
    }

    tracing::info!("cisco-socks5 stopped");
    Ok(())
}

#[cfg(unix)]
fn ensure_not_root() -> Result<()> {
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    if uid == 0 || gid == 0 {
        anyhow::bail!(
            "Refusing to run as root. Run cisco-socks5 as the user whose account the tunnel logs into."
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_not_root() -> Result<()> {
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = ctrl_c => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
