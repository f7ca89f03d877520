//! Evidence from the simulation directory: checkpoints, the completion marker, the stop marker
//!
//! The daemon never reads simulation files itself. It asks the cluster through the remote
//! executor, with the checkpoint listing command taken from configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Chain;
use crate::config::CheckpointConfig;
use crate::remote::{shell_quote, Executor, RemoteError};
use crate::scheduler::parse::Parsed;
use crate::template::{render, TemplateError};

/// A checkpoint file and its modification time in milliseconds since the epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub path: String,
    pub stamp_ms: i64,
}

impl CheckpointRef {
    /// Strictly newer than `other`, anything is newer than nothing
    pub fn is_newer_than(&self, other: Option<&CheckpointRef>) -> bool {
        other.map_or(true, |other| self.stamp_ms > other.stamp_ms)
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("cluster unreachable: {0}")]
    Transport(String),

    #[error("checkpoint command failed with status {exit_code}: {}", .stderr.trim())]
    Command { exit_code: i32, stderr: String },

    #[error("can't read checkpoint listing {0:?}")]
    Listing(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl From<RemoteError> for CheckpointError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport { message, .. } => CheckpointError::Transport(message),
            RemoteError::Command { exit_code, stderr, .. } => CheckpointError::Command { exit_code, stderr },
        }
    }
}

#[async_trait]
pub trait Checkpoints: Send + Sync {
    /// Newest checkpoint of the chain's simulation if it is strictly newer than `since`
    async fn has_new_checkpoint(&self, chain: &Chain, since: Option<&CheckpointRef>) -> Result<Option<CheckpointRef>, CheckpointError>;

    /// The completion marker exists
    async fn is_simulation_complete(&self, chain: &Chain) -> Result<bool, CheckpointError>;

    /// The stop marker exists and no further jobs may be submitted
    async fn restart_blocked(&self, chain: &Chain) -> Result<bool, CheckpointError>;
}

/// Parse a checkpoint listing, one `<epoch seconds> <path>` line per file, oldest first
///
/// The last line wins. Empty output means there is no checkpoint yet.
pub fn parse_listing(stdout: &str) -> Parsed<Option<CheckpointRef>> {
    let Some(line) = stdout.lines().map(str::trim).filter(|line| !line.is_empty()).last() else {
        return Parsed::Parsed(None);
    };
    let Some((stamp, path)) = line.split_once(char::is_whitespace) else {
        return Parsed::Malformed(stdout.to_string());
    };
    let path = path.trim();
    match stamp.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && !path.is_empty() => Parsed::Parsed(Some(CheckpointRef {
            path: path.to_string(),
            stamp_ms: (seconds * 1000.0).round() as i64,
        })),
        _ => Parsed::Malformed(stdout.to_string()),
    }
}

/// Path of a marker file, relative names are taken from the simulation directory
fn marker_path(workdir: &str, marker: &str) -> String {
    if marker.starts_with('/') {
        marker.to_string()
    } else {
        format!("{}/{marker}", workdir.trim_end_matches('/'))
    }
}

/// Rendering context for the checkpoint listing template
#[derive(Serialize)]
struct ListingContext {
    workdir: String,
    pattern: String,
}

/// Checkpoint evidence gathered with shell commands on the cluster
pub struct RemoteCheckpoints {
    executor: Arc<dyn Executor>,
    config: CheckpointConfig,
    timeout: Duration,
}

impl RemoteCheckpoints {
    pub fn new(executor: Arc<dyn Executor>, config: &CheckpointConfig, timeout: Duration) -> Self {
        RemoteCheckpoints { executor, config: config.clone(), timeout }
    }

    /// `test -e` exits 1 for a missing file, any other failure is an error
    async fn exists(&self, path: &str) -> Result<bool, CheckpointError> {
        let command = format!("test -e {}", shell_quote(path));
        match self.executor.execute(&command, self.timeout).await {
            Ok(_) => Ok(true),
            Err(RemoteError::Command { exit_code: 1, .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Checkpoints for RemoteCheckpoints {
    async fn has_new_checkpoint(&self, chain: &Chain, since: Option<&CheckpointRef>) -> Result<Option<CheckpointRef>, CheckpointError> {
        let context = ListingContext {
            workdir: shell_quote(chain.simulation.workdir.trim_end_matches('/')),
            pattern: shell_quote(&self.config.pattern),
        };
        let command = render("latest", &self.config.latest, &context)?;
        let output = self.executor.execute(&command, self.timeout).await?;

        match parse_listing(&output.stdout) {
            Parsed::Parsed(Some(latest)) if latest.is_newer_than(since) => {
                info!("Chain {}: new checkpoint {} ({})", chain.id, latest.path, latest.stamp_ms);
                Ok(Some(latest))
            }
            Parsed::Parsed(latest) => {
                debug!("Chain {}: no checkpoint newer than {:?} (latest {:?})", chain.id, since, latest);
                Ok(None)
            }
            Parsed::Malformed(raw) => Err(CheckpointError::Listing(raw)),
        }
    }

    async fn is_simulation_complete(&self, chain: &Chain) -> Result<bool, CheckpointError> {
        let simulation = &chain.simulation;
        self.exists(&marker_path(&simulation.workdir, &simulation.completion_marker)).await
    }

    async fn restart_blocked(&self, chain: &Chain) -> Result<bool, CheckpointError> {
        match &self.config.stop_marker {
            Some(marker) => self.exists(&marker_path(&chain.simulation.workdir, marker)).await,
            None => Ok(false),
        }
    }
}
