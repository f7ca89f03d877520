use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};

use crate::config::RemoteConfig;
use crate::remote::{CommandOutput, Executor, RemoteError};

/// How often and how patiently transport failures are retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        RetryPolicy {
            max_retries: remote.max_retries,
            initial_delay: Duration::from_millis(remote.backoff_initial_ms),
            max_delay: Duration::from_millis(remote.backoff_max_ms),
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time up to the cap
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retries transient channel failures of the wrapped executor with exponential backoff
///
/// A command that exited with a status, even a failing one, is a scheduler level answer and is
/// handed back immediately.
pub struct RetryingExecutor<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Executor> RetryingExecutor<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        RetryingExecutor { inner, policy }
    }
}

#[async_trait]
impl<E: Executor> Executor for RetryingExecutor<E> {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RemoteError> {
        let attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.inner.execute(command, timeout).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!("Remote channel recovered after {attempt} attempt(s)");
                    }
                    return Ok(output);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!("Remote channel failure (attempt {attempt}/{attempts}): {err}");
                    warn!("Retrying in {} ms...", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
                Err(RemoteError::Transport { message, retryable: true }) => {
                    error!("Remote channel still failing after {attempts} attempts");
                    return Err(RemoteError::transport(
                        format!("{message} (gave up after {attempts} attempts)"),
                        false,
                    ));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_once(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RemoteError> {
        match self.inner.execute_once(command, timeout).await {
            Err(RemoteError::Transport { message, .. }) => Err(RemoteError::transport(message, false)),
            other => other,
        }
    }
}
