//! Run shell commands on the cluster login node
//!
//! Every command is a fresh remote process. Implementations only decide how the process is
//! reached (over ssh or on this host), [RetryingExecutor] adds the backoff policy on top.

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Commands sent over an OpenSSH connection, reusing a control master
pub mod ssh;
/// Commands run on this host with `sh -c`
pub mod local;
/// Exponential backoff for transport failures
pub mod retry;

pub use local::LocalExecutor;
pub use retry::{RetryPolicy, RetryingExecutor};
pub use ssh::SshExecutor;

/// Output of a remote command that exited 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// We could not even ask: connection refused, authentication failed, timeout
    #[error("remote channel failure: {message}")]
    Transport { message: String, retryable: bool },

    /// The command ran and said no
    #[error("remote command exited with status {exit_code}: {}", .stderr.trim())]
    Command {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

impl RemoteError {
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        RemoteError::Transport { message: message.into(), retryable }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport { retryable: true, .. })
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` and wait for it, bounded by `timeout` including connection setup
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RemoteError>;

    /// Run `command` at most once, for commands that must not be repeated when the channel
    /// drops after the remote side may have acted
    async fn execute_once(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RemoteError> {
        self.execute(command, timeout).await
    }
}

/// Turn a finished process into a result
///
/// `transport_status` is the exit status the channel itself uses to report failure (255 for
/// ssh), which is never attributed to the remote command.
pub(crate) fn classify(output: Output, transport_status: Option<i32>) -> Result<CommandOutput, RemoteError> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    match output.status.code() {
        Some(0) => Ok(CommandOutput { exit_code: 0, stdout, stderr }),
        Some(code) if Some(code) == transport_status => {
            Err(RemoteError::transport(format!("channel exited with {code}: {}", stderr.trim()), true))
        }
        Some(code) => Err(RemoteError::Command { exit_code: code, stdout, stderr }),
        None => Err(RemoteError::transport("channel process was killed by a signal", false)),
    }
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:@=%+,".contains(c)) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_classify_success() {
        let result = classify(output(0, "42\n", ""), Some(255)).unwrap();
        assert_eq!(result.stdout, "42\n");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn test_classify_channel_failure_is_transport() {
        let err = classify(output(255, "", "Connection reset by peer"), Some(255)).unwrap_err();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_nonzero_is_command_error() {
        let err = classify(output(1, "", "slurm_load_jobs error: Invalid job id specified"), Some(255)).unwrap_err();
        match err {
            RemoteError::Command { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 1);
                assert!(stderr.contains("Invalid job id"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_local_255_is_command_error() {
        let err = classify(output(255, "", ""), None).unwrap_err();
        assert!(!err.is_transport());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/scratch/run-1/md.cpt"), "/scratch/run-1/md.cpt");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("my run"), "'my run'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
