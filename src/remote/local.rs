use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::remote::{classify, CommandOutput, Executor, RemoteError};

/// Runs commands on this host, for a daemon that lives on the login node itself
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RemoteError> {
        debug!("sh -c {command}");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| RemoteError::transport(format!("can't start sh: {err}"), false))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => classify(output, None),
            Ok(Err(err)) => Err(RemoteError::transport(format!("i/o error: {err}"), false)),
            Err(_) => Err(RemoteError::transport(format!("command timed out after {timeout:?}"), false)),
        }
    }
}
