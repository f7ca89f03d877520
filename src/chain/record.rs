use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{Job, Outcome, Phase, Summary};
use crate::checkpoint::CheckpointRef;
use crate::submit::ResourceRequest;

/// The simulation a chain keeps running
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulation {
    /// Remote directory the simulation runs in and writes checkpoints to
    pub workdir: String,
    /// Shell line run before the executable, e.g. `module load gromacs`
    #[serde(default)]
    pub preload: Option<String>,
    pub executable: String,
    #[serde(default)]
    pub args: String,
    /// Appended when continuing, `{checkpoint}` is replaced by the checkpoint path
    #[serde(default)]
    pub resume_args: Option<String>,
    /// File in `workdir` that only exists once the simulation has finished
    pub completion_marker: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: String,
    pub simulation: Simulation,
    pub resources: ResourceRequest,
    pub phase: Phase,
    /// In submission order
    pub jobs: Vec<Job>,
    /// Newest checkpoint known to have advanced the simulation
    pub latest_checkpoint: Option<CheckpointRef>,
    pub consecutive_failures: u32,
    /// Failed attempts at submitting the next job
    pub submit_attempts: u32,
    /// Polls in a row that produced no usable status
    pub inconclusive_polls: u32,
    /// Job name of a submission that may have reached the scheduler without being recorded
    pub in_flight: Option<String>,
    /// Why the chain was aborted
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chain ids end up in job names and file names
pub fn valid_chain_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl Chain {
    pub fn new(id: &str, simulation: Simulation, resources: ResourceRequest, now: DateTime<Utc>) -> Self {
        Chain {
            id: id.to_string(),
            simulation,
            resources,
            phase: Phase::PendingSubmit,
            jobs: Vec::new(),
            latest_checkpoint: None,
            consecutive_failures: 0,
            submit_attempts: 0,
            inconclusive_polls: 0,
            in_flight: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn job_name(&self, number: usize) -> String {
        format!("{}_{}", self.id, number)
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.jobs.last().filter(|job| job.is_active())
    }

    pub fn active_job_mut(&mut self) -> Option<&mut Job> {
        self.jobs.last_mut().filter(|job| job.is_active())
    }

    pub fn last_job(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn summary(&self) -> Summary {
        match self.phase {
            Phase::ChainDone => Summary::Completed,
            Phase::ChainAborted => match self.last_job().and_then(|job| job.outcome) {
                Some(Outcome::Failure) => Summary::Failed,
                _ => Summary::Aborted,
            },
            _ => Summary::Running,
        }
    }

    /// Structural invariants a persisted chain must satisfy, as a list of violations
    pub fn violations(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let active = self.jobs.iter().filter(|job| job.is_active()).count();
        if active > 1 {
            problems.push(format!("{active} active jobs"));
        }
        if active == 1 && self.active_job().is_none() {
            problems.push("active job is not the newest one".to_string());
        }
        if (self.phase == Phase::Active) != (active == 1) {
            problems.push(format!("phase {} with {active} active job(s)", self.phase));
        }
        for (index, job) in self.jobs.iter().enumerate() {
            if job.number != index + 1 {
                problems.push(format!("job {} stored at position {}", job.number, index + 1));
            }
        }

        problems
    }
}
