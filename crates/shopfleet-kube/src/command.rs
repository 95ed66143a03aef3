//! External command execution
//!
//! The release driver shells out to `helm`. Commands go through
//! [`CommandRunner`] so tests can script the tool's output.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

use crate::error::{KubeError, Result};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs a program to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it once `timeout` elapses
    ///
    /// A non-zero exit is reported through `CommandOutput::success`, not as
    /// an error. Errors mean the command could not be run or timed out.
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput>;
}

/// Runs commands as child processes
///
/// The child is killed when the returned future is dropped, so cancelling
/// the caller also stops the command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let verb = args.first().map(String::as_str).unwrap_or_default();
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| KubeError::Timeout(format!("{} {} after {:?}", program, verb, timeout)))??;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
