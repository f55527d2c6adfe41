//! Subprocess helper shared by the collaborators

use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Result, TunnelError};

/// Exit status and combined stdout/stderr of a finished command
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub status: ExitStatus,
    pub text: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Convert a non-zero exit into [`TunnelError::CommandFailed`]
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.into_error(command))
        }
    }

    pub fn into_error(self, command: &str) -> TunnelError {
        TunnelError::CommandFailed {
            command: command.to_string(),
            status: self.status,
            output: self.text.trim().to_string(),
        }
    }
}

/// Run `program` to completion, optionally feeding `stdin`
pub(crate) async fn run(program: &str, args: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = cmd.spawn().map_err(|source| TunnelError::Spawn {
        command: program.to_string(),
        source,
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // The program may exit without reading everything.
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            tracing::debug!("Failed to write stdin of {}: {}", program, e);
        }
    }

    let output = child.wait_with_output().await?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandOutput {
        status: output.status,
        text,
    })
}
