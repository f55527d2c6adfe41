//! The `ssh -D` process that serves the SOCKS5 proxy

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use cs_core::config::AgentConfig;

use crate::command;
use crate::error::{Result, TunnelError};

/// Lifecycle of the background tunnel process
#[async_trait]
pub trait TunnelProcess: Send + Sync {
    /// Launch the tunnel in the background and return its PID
    async fn start(&self, private_key: &Path) -> Result<u32>;

    /// PID of a running tunnel with this configuration, if any
    async fn find_pid(&self) -> Result<Option<u32>>;

    /// Ask the process to terminate
    async fn stop(&self, pid: u32) -> Result<()>;

    fn is_running(&self, pid: u32) -> bool;
}

/// OpenSSH dynamic port forward to a local account
#[derive(Debug, Clone)]
pub struct SshTunnel {
    local_username: String,
    local_host: String,
    tunnel_address: String,
}

impl SshTunnel {
    pub fn new(local_username: String, local_host: String, tunnel_address: String) -> Self {
        Self {
            local_username,
            local_host,
            tunnel_address,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.local_username.clone(),
            config.local_host.clone(),
            config.tunnel_address.clone(),
        )
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.local_username, self.local_host)
    }

    /// Argument tail identifying this tunnel in a process listing
    pub fn signature(&self) -> String {
        format!("-D {} -N {}", self.tunnel_address, self.destination())
    }

    fn args(&self, private_key: &Path) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-i".to_string(),
            private_key.to_string_lossy().into_owned(),
            "-D".to_string(),
            self.tunnel_address.clone(),
            "-N".to_string(),
            self.destination(),
        ]
    }
}

/// PID of the first `ps aux` line containing `signature`
pub fn find_pid_in(ps_output: &str, signature: &str) -> Option<u32> {
    ps_output
        .lines()
        .filter(|line| line.contains(signature))
        .filter_map(|line| line.split_whitespace().nth(1)?.parse::<u32>().ok())
        .find(|pid| *pid > 0)
}

#[async_trait]
impl TunnelProcess for SshTunnel {
    async fn start(&self, private_key: &Path) -> Result<u32> {
        let mut child = Command::new("ssh")
            .args(self.args(private_key))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TunnelError::Spawn {
                command: "ssh".to_string(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| {
            TunnelError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "ssh exited before its PID was read",
            ))
        })?;

        // Reap the child when it exits.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!("Tunnel process {} exited: {}", pid, status),
                Err(e) => tracing::warn!("Failed to wait for tunnel process {}: {}", pid, e),
            }
        });

        tracing::info!("Started tunnel process {} ({})", pid, self.signature());
        Ok(pid)
    }

    async fn find_pid(&self) -> Result<Option<u32>> {
        let out = command::run("ps", &["aux"], None).await?.check("ps aux")?;
        Ok(find_pid_in(&out.text, &self.signature()))
    }

    async fn stop(&self, pid: u32) -> Result<()> {
        terminate(pid)
    }

    fn is_running(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    let raw = libc::pid_t::try_from(pid).map_err(|_| TunnelError::InvalidPid(pid))?;
    if raw <= 0 {
        return Err(TunnelError::InvalidPid(pid));
    }

    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result != 0 {
        return Err(TunnelError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> Result<()> {
    Err(TunnelError::Unsupported("signalling the tunnel process"))
}

/// kill(pid, 0) succeeds, or fails with EPERM, for a live process
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    let result = unsafe { libc::kill(raw, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel() -> SshTunnel {
        SshTunnel::new(
            "alice".to_string(),
            "127.0.0.1".to_string(),
            "127.0.0.1:8000".to_string(),
        )
    }

    const PS_OUTPUT: &str = "\
USER    PID  %CPU %MEM      VSZ    RSS   TT  STAT STARTED      TIME COMMAND
alice   412   0.0  0.1 34123456   5120   ??  S    10:02AM   0:00.02 /usr/bin/ssh -o StrictHostKeyChecking=no -i /Users/alice/.ssh/id_ed25519_cisco_socks5 -D 127.0.0.1:9000 -N alice@127.0.0.1
alice   977   0.0  0.1 34123456   5120   ??  S    10:05AM   0:00.01 /usr/bin/ssh -o StrictHostKeyChecking=no -i /Users/alice/.ssh/id_ed25519_cisco_socks5 -D 127.0.0.1:8000 -N alice@127.0.0.1
root      1   0.0  0.1 34123456   5120   ??  Ss   9:00AM    0:10.00 /sbin/launchd
";

    #[test]
    fn test_signature() {
        assert_eq!(tunnel().signature(), "-D 127.0.0.1:8000 -N alice@127.0.0.1");
    }

    #[test]
    fn test_args_end_with_signature() {
        let args = tunnel().args(Path::new("/k"));
        assert_eq!(args[..4], ["-o", "StrictHostKeyChecking=no", "-i", "/k"]);
        assert_eq!(args[4..].join(" "), tunnel().signature());
    }

    #[test]
    fn test_find_pid_matches_exact_tunnel() {
        assert_eq!(find_pid_in(PS_OUTPUT, &tunnel().signature()), Some(977));
    }

    #[test]
    fn test_find_pid_none() {
        let other = SshTunnel::new("bob".into(), "127.0.0.1".into(), "127.0.0.1:8000".into());
        assert_eq!(find_pid_in(PS_OUTPUT, &other.signature()), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_current_process_is_alive() {
        assert!(tunnel().is_running(std::process::id()));
        assert!(!tunnel().is_running(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_rejects_pid_zero() {
        assert!(matches!(
            tunnel().stop(0).await,
            Err(TunnelError::InvalidPid(0))
        ));
    }
}
