//! Command execution, locally or on a remote host over ssh.
//!
//! Everything tidewatch does to a pane or a remote log goes through a
//! [`CommandRunner`], so tests can substitute a recording fake.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{Result, TmuxError};

/// Default ssh `ConnectTimeout` in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default budget for a whole local command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` if killed by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Converts a non-zero exit into [`TmuxError::Failed`].
    pub fn into_result(self, program: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TmuxError::Failed {
                program: program.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs a program with arguments, on `host` when given.
///
/// Implementations return `Ok` for any command that ran to completion,
/// whatever its exit code; `Err` means it could not be run or timed out.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, host: Option<&str>, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
///
/// Remote commands become `ssh -o ConnectTimeout=N -o BatchMode=yes host '<cmd>'`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    connect_timeout_secs: u64,
    command_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(connect_timeout_secs: u64, command_timeout: Duration) -> Self {
        Self {
            connect_timeout_secs,
            command_timeout,
        }
    }

    fn build(&self, host: Option<&str>, program: &str, args: &[String]) -> (String, Vec<String>) {
        match host {
            None => (program.to_string(), args.to_vec()),
            Some(host) => {
                let remote = std::iter::once(program)
                    .chain(args.iter().map(String::as_str))
                    .map(shell_quote)
                    .collect::<Vec<_>>()
                    .join(" ");
                (
                    "ssh".to_string(),
                    vec![
                        "-o".to_string(),
                        format!("ConnectTimeout={}", self.connect_timeout_secs),
                        "-o".to_string(),
                        "BatchMode=yes".to_string(),
                        host.to_string(),
                        remote,
                    ],
                )
            }
        }
    }

    /// Time allowed for one invocation, including the ssh handshake.
    fn budget(&self, host: Option<&str>) -> Duration {
        match host {
            Some(_) => self.command_timeout + Duration::from_secs(self.connect_timeout_secs),
            None => self.command_timeout,
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, host: Option<&str>, program: &str, args: &[String]) -> Result<CommandOutput> {
        let (exe, argv) = self.build(host, program, args);
        let budget = self.budget(host);
        trace!(program = %exe, args = ?argv, "running command");

        let child = Command::new(&exe)
            .args(&argv)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(budget, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(TmuxError::Spawn { program: exe, source }),
            Err(_) => {
                return Err(TmuxError::Timeout {
                    program: exe,
                    timeout: budget,
                })
            }
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        };
        debug!(program = %exe, host = ?host, status = ?result.status, "command finished");
        Ok(result)
    }
}

/// Quotes a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:%=@,+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
