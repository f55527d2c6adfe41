//! Error types for the tunnel agent

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors raised by the agent's external collaborators
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("VPN connection not established: {0}")]
    NotConnected(String),

    #[error("Key file {path:?}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid PID: {0}")]
    InvalidPid(u32),

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for agent operations
pub type Result<T> = std::result::Result<T, TunnelError>;
