//! Local SOCKS5 tunnel management
//!
//! The proxy is an `ssh -D` session into the local account. Logging in needs
//! a dedicated key pair authorized in the account's `authorized_keys`;
//! [`TunnelService`] provisions it on first use and then keeps exactly one
//! matching `ssh` process alive.

mod keys;
mod process;

pub use keys::{KeyStore, SshKeyStore};
pub use process::{find_pid_in, SshTunnel, TunnelProcess};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// File name of the tunnel's private key inside the SSH directory
pub const PRIVATE_KEY_NAME: &str = "id_ed25519_cisco_socks5";

/// Key provisioning plus process control for the tunnel
pub struct TunnelService {
    private_key: PathBuf,
    public_key: PathBuf,
    keys: Arc<dyn KeyStore>,
    process: Arc<dyn TunnelProcess>,
    key_ready: AtomicBool,
}

impl TunnelService {
    pub fn new(ssh_dir: &Path, keys: Arc<dyn KeyStore>, process: Arc<dyn TunnelProcess>) -> Self {
        Self {
            private_key: ssh_dir.join(PRIVATE_KEY_NAME),
            public_key: ssh_dir.join(format!("{}.pub", PRIVATE_KEY_NAME)),
            keys,
            process,
            key_ready: AtomicBool::new(false),
        }
    }

    pub fn private_key(&self) -> &Path {
        &self.private_key
    }

    /// Make sure the key pair exists and is authorized
    ///
    /// Only touches the filesystem until the first success.
    pub async fn setup_key(&self) -> Result<()> {
        if self.key_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let public_key = match self.keys.read_key(&self.public_key).await? {
            Some(key) => key,
            None => self.keys.generate_key(&self.private_key).await?,
        };

        if !self.keys.key_installed(&public_key).await? {
            self.keys.install_key(&public_key).await?;
        }

        self.key_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Start the tunnel unless a matching process is already running
    pub async fn start_tunnel(&self) -> Result<()> {
        self.setup_key().await?;

        if let Some(pid) = self.process.find_pid().await? {
            tracing::debug!("Tunnel already running as {}", pid);
            return Ok(());
        }

        tracing::info!("Starting tunnel...");
        self.process.start(&self.private_key).await?;
        Ok(())
    }

    pub async fn tunnel_pid(&self) -> Result<Option<u32>> {
        self.process.find_pid().await
    }

    /// Terminate the tunnel; a process that already exited is not an error
    pub async fn stop_tunnel(&self, pid: u32) -> Result<()> {
        if !self.process.is_running(pid) {
            tracing::debug!("Tunnel process {} already exited", pid);
            return Ok(());
        }
        self.process.stop(pid).await
    }
}
