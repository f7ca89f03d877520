use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::config::ClusterConfig;
use crate::remote::{classify, CommandOutput, Executor, RemoteError};

/// ssh reserves this exit status for its own errors
const SSH_FAILURE: i32 = 255;

/// Runs commands on a login node through the system `ssh` client
///
/// Authentication is key based only (`BatchMode=yes`), a password prompt would hang the daemon.
/// When a control path is configured the first command opens a master connection that later
/// commands multiplex over, each still getting its own remote process.
pub struct SshExecutor {
    destination: String,
    port: Option<u16>,
    identity_file: Option<String>,
    control_path: Option<String>,
    control_persist: Duration,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(host: &str, cluster: &ClusterConfig) -> Self {
        let destination = match &cluster.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        info!("Remote commands go to {destination} over ssh");

        SshExecutor {
            destination,
            port: cluster.port,
            identity_file: cluster.identity_file.clone(),
            control_path: cluster.control_path.clone(),
            control_persist: Duration::from_secs(cluster.control_persist_secs),
            connect_timeout: Duration::from_secs(cluster.connect_timeout_secs),
        }
    }

    fn args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        if let Some(path) = &self.control_path {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={path}"),
                "-o".to_string(),
                format!("ControlPersist={}", self.control_persist.as_secs()),
            ]);
        }
        args.push(self.destination.clone());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RemoteError> {
        debug!("ssh {}: {command}", self.destination);

        let child = Command::new("ssh")
            .args(self.args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                let retryable = err.kind() != std::io::ErrorKind::NotFound;
                RemoteError::transport(format!("can't start ssh: {err}"), retryable)
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => classify(output, Some(SSH_FAILURE)),
            Ok(Err(err)) => Err(RemoteError::transport(format!("ssh i/o error: {err}"), true)),
            // the remote side may already have acted, so a timeout is never retried
            Err(_) => Err(RemoteError::transport(format!("no answer from {} within {timeout:?}", self.destination), false)),
        }
    }
}
