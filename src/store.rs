//! Durable daemon state: every chain plus the queue of chains waiting to be started
//!
//! The daemon is the only writer of chains. `jatko submit` only adds requests to the queue,
//! which the daemon drains at the start of each cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::{Chain, Simulation};
use crate::submit::ResourceRequest;

/// SQLite store used by the daemon and the CLI
pub mod sqlite;
/// In-memory store for tests and dry runs
pub mod memory;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("can't serialise state: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("persisted state is corrupt: {0}")]
    Corruption(String),

    #[error("chain {0} already exists")]
    DuplicateChain(String),

    #[error("can't create state directory {path}: {source}")]
    Directory { path: PathBuf, source: std::io::Error },
}

/// Everything the daemon knows, keyed by chain id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub chains: BTreeMap<String, Chain>,
}

impl DaemonState {
    /// Reject state no daemon could have written
    pub fn check(&self) -> Result<(), StoreError> {
        for (id, chain) in &self.chains {
            if *id != chain.id {
                return Err(StoreError::Corruption(format!("chain {} stored under {id}", chain.id)));
            }
            let violations = chain.violations();
            if !violations.is_empty() {
                return Err(StoreError::Corruption(format!("chain {id}: {}", violations.join(", "))));
            }
        }
        Ok(())
    }

    /// Chains that have not reached CHAIN_DONE or CHAIN_ABORTED
    pub fn live(&self) -> usize {
        self.chains.values().filter(|chain| !chain.phase.is_terminal()).count()
    }
}

/// A queued request to start a new chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRequest {
    pub id: String,
    pub simulation: Simulation,
    pub resources: ResourceRequest,
    pub requested_at: DateTime<Utc>,
}

impl ChainRequest {
    pub fn into_chain(self, now: DateTime<Utc>) -> Chain {
        Chain::new(&self.id, self.simulation, self.resources, now)
    }
}

pub trait StateStore: Send {
    /// Load and check every chain
    fn load(&self) -> Result<DaemonState, StoreError>;

    /// Write every chain atomically and drop the requests that became chains
    fn save(&mut self, state: &DaemonState) -> Result<(), StoreError>;

    /// Queue a new chain, its id must not be taken by a chain or another request
    fn enqueue(&mut self, request: &ChainRequest) -> Result<(), StoreError>;

    /// Queued requests, oldest first
    fn pending_requests(&self) -> Result<Vec<ChainRequest>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::config::Config;

    fn chain(id: &str) -> Chain {
        let simulation = Simulation {
            workdir: "/scratch/md".to_string(),
            preload: None,
            executable: "gmx mdrun".to_string(),
            args: String::new(),
            resume_args: None,
            completion_marker: "md.gro".to_string(),
        };
        Chain::new(id, simulation, Config::sample().resources, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_fresh_state_is_consistent() {
        let mut state = DaemonState::default();
        state.chains.insert("md".to_string(), chain("md"));
        assert!(state.check().is_ok());
        assert_eq!(state.live(), 1);
    }

    #[test]
    fn test_misfiled_chain_is_corrupt() {
        let mut state = DaemonState::default();
        state.chains.insert("other".to_string(), chain("md"));
        assert!(matches!(state.check(), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn test_active_phase_without_job_is_corrupt() {
        let mut chain = chain("md");
        chain.phase = crate::chain::Phase::Active;
        let mut state = DaemonState::default();
        state.chains.insert("md".to_string(), chain);
        assert!(matches!(state.check(), Err(StoreError::Corruption(_))));
    }
}
