//! SSH key provisioning for the loopback tunnel

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::command;
use crate::error::{Result, TunnelError};

const KEY_COMMENT: &str = "cisco-socks5";

/// Storage of the tunnel's key pair and the local `authorized_keys`
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Public key contents, or `None` if the file does not exist
    async fn read_key(&self, public_key: &Path) -> Result<Option<String>>;

    /// Create a fresh key pair at `private_key` and return the public key
    async fn generate_key(&self, private_key: &Path) -> Result<String>;

    /// Whether `public_key` is already authorized for local logins
    async fn key_installed(&self, public_key: &str) -> Result<bool>;

    /// Authorize `public_key` for local logins
    async fn install_key(&self, public_key: &str) -> Result<()>;
}

/// [`KeyStore`] over an OpenSSH directory, generating keys with `ssh-keygen`
#[derive(Debug, Clone)]
pub struct SshKeyStore {
    ssh_dir: PathBuf,
}

impl SshKeyStore {
    pub fn new(ssh_dir: PathBuf) -> Self {
        Self { ssh_dir }
    }

    pub fn authorized_keys_path(&self) -> PathBuf {
        self.ssh_dir.join("authorized_keys")
    }

    async fn ensure_ssh_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.ssh_dir)
            .await
            .map_err(|source| TunnelError::KeyFile {
                path: self.ssh_dir.clone(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.ssh_dir, std::fs::Permissions::from_mode(0o700))
                .await?;
        }

        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(TunnelError::KeyFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn public_key_path(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

#[async_trait]
impl KeyStore for SshKeyStore {
    async fn read_key(&self, public_key: &Path) -> Result<Option<String>> {
        read_optional(public_key).await
    }

    async fn generate_key(&self, private_key: &Path) -> Result<String> {
        self.ensure_ssh_dir().await?;

        // ssh-keygen prompts before overwriting; a lone private key is stale.
        match tokio::fs::remove_file(private_key).await {
            Ok(()) => tracing::debug!("Removed stale key at {:?}", private_key),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(TunnelError::KeyFile {
                    path: private_key.to_path_buf(),
                    source,
                })
            }
        }

        tracing::info!("Generating SSH key at {:?}", private_key);
        let path = private_key.to_string_lossy();
        command::run(
            "ssh-keygen",
            &["-t", "ed25519", "-f", &path, "-N", "", "-C", KEY_COMMENT, "-q"],
            None,
        )
        .await?
        .check("ssh-keygen")?;

        let public_path = public_key_path(private_key);
        read_optional(&public_path)
            .await?
            .ok_or_else(|| TunnelError::KeyFile {
                path: public_path,
                source: io::Error::new(io::ErrorKind::NotFound, "ssh-keygen wrote no public key"),
            })
    }

    async fn key_installed(&self, public_key: &str) -> Result<bool> {
        let authorized = read_optional(&self.authorized_keys_path())
            .await?
            .unwrap_or_default();
        let key = public_key.trim();
        Ok(!key.is_empty() && authorized.lines().any(|line| line.trim() == key))
    }

    async fn install_key(&self, public_key: &str) -> Result<()> {
        self.ensure_ssh_dir().await?;
        let path = self.authorized_keys_path();
        let existing = read_optional(&path).await?.unwrap_or_default();

        let mut entry = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            entry.push('\n');
        }
        entry.push_str(public_key.trim());
        entry.push('\n');

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&path)
            .await
            .map_err(|source| TunnelError::KeyFile {
                path: path.clone(),
                source,
            })?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;

        tracing::info!("Authorized tunnel key in {:?}", path);
        Ok(())
    }
}
