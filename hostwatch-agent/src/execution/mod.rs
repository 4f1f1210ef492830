//! External command execution for the collectors
//!
//! Runs the container-runtime and service-manager CLIs with a hard timeout.
//! Only argv-style invocations are supported: no shell is involved.

use crate::error::CommandError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program args...`, returning its output whatever the exit code
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    debug!("Executing command: {} {:?} (timeout: {:?})", program, args, timeout);

    let output = tokio::time::timeout(
        timeout,
        AsyncCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| CommandError::Timeout {
        program: program.to_string(),
        secs: timeout.as_secs(),
    })?
    .map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}

/// Like [`run_command`] but a non-zero exit is an error
pub async fn run_checked(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, CommandError> {
    let output = run_command(program, args, timeout).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(CommandError::Failed {
            program: program.to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
