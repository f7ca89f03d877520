#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use jatko::chain::{Chain, Policy, Simulation};
use jatko::checkpoint::{CheckpointError, CheckpointRef, Checkpoints};
use jatko::config::Config;
use jatko::daemon::clock::Clock;
use jatko::daemon::{Daemon, DaemonError, Services, Settings};
use jatko::scheduler::{BatchScheduler, PollResult, SchedulerError};
use jatko::store::{ChainRequest, MemoryStore, StateStore};
use jatko::submit::JobScript;

/// What the fake scheduler answers to a query
#[derive(Clone, Debug)]
pub enum Answer {
    State(&'static str),
    Transport,
}

/// What the fake scheduler answers to a submission
#[derive(Clone, Debug)]
pub enum Submission {
    Accept(&'static str),
    Refuse,
    /// Accepted with an acknowledgement that carries no job id
    Garbled,
    Unreachable,
}

#[derive(Default)]
struct SchedulerScript {
    polls: HashMap<String, VecDeque<Answer>>,
    last: HashMap<String, Answer>,
    submissions: VecDeque<Submission>,
    live: HashMap<String, String>,
    submitted: Vec<JobScript>,
    queried: Vec<String>,
    cancelled: Vec<String>,
    looked_up: Vec<String>,
}

/// Scheduler answering from a script, the last answer for a job repeats once the script runs out
#[derive(Default)]
pub struct ScriptedScheduler {
    script: Mutex<SchedulerScript>,
}

impl ScriptedScheduler {
    pub fn polls(&self, job_id: &str, answers: &[Answer]) {
        let mut script = self.script.lock().unwrap();
        script.polls.entry(job_id.to_string()).or_default().extend(answers.iter().cloned());
    }

    pub fn submissions(&self, answers: &[Submission]) {
        self.script.lock().unwrap().submissions.extend(answers.iter().cloned());
    }

    /// A job the scheduler knows under this name
    pub fn live(&self, job_name: &str, job_id: &str) {
        self.script.lock().unwrap().live.insert(job_name.to_string(), job_id.to_string());
    }

    pub fn submitted(&self) -> Vec<JobScript> {
        self.script.lock().unwrap().submitted.clone()
    }

    pub fn queried(&self) -> Vec<String> {
        self.script.lock().unwrap().queried.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.script.lock().unwrap().cancelled.clone()
    }

    pub fn looked_up(&self) -> Vec<String> {
        self.script.lock().unwrap().looked_up.clone()
    }
}

#[async_trait]
impl BatchScheduler for ScriptedScheduler {
    async fn submit(&self, script: &JobScript) -> Result<String, SchedulerError> {
        let mut state = self.script.lock().unwrap();
        state.submitted.push(script.clone());
        match state.submissions.pop_front().expect("unexpected submission") {
            Submission::Accept(job_id) => {
                state.live.insert(script.name.clone(), job_id.to_string());
                Ok(job_id.to_string())
            }
            Submission::Refuse => Err(SchedulerError::Command {
                exit_code: 1,
                stdout: String::new(),
                stderr: "sbatch: error: Batch job submission failed: Invalid account".to_string(),
            }),
            Submission::Garbled => Err(SchedulerError::Submission { raw: "sbatch: job queued\n".to_string() }),
            Submission::Unreachable => Err(SchedulerError::Transport("Connection timed out".to_string())),
        }
    }

    async fn query(&self, job_id: &str) -> Result<PollResult, SchedulerError> {
        let mut state = self.script.lock().unwrap();
        state.queried.push(job_id.to_string());
        let next = state.polls.get_mut(job_id).and_then(VecDeque::pop_front);
        let answer = match next {
            Some(answer) => {
                state.last.insert(job_id.to_string(), answer.clone());
                answer
            }
            None => state.last.get(job_id).cloned().unwrap_or(Answer::State("PENDING")),
        };
        match answer {
            Answer::State(raw) => Ok(PollResult::new(job_id, raw)),
            Answer::Transport => Err(SchedulerError::Transport("Connection reset by peer".to_string())),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.script.lock().unwrap().cancelled.push(job_id.to_string());
        Ok(())
    }

    async fn lookup(&self, job_name: &str) -> Result<Option<String>, SchedulerError> {
        let mut state = self.script.lock().unwrap();
        state.looked_up.push(job_name.to_string());
        Ok(state.live.get(job_name).cloned())
    }
}

#[derive(Default)]
struct Evidence {
    complete: bool,
    blocked: bool,
    latest: Option<CheckpointRef>,
}

/// Simulation directory whose contents the test sets directly
#[derive(Default)]
pub struct FakeCheckpoints {
    evidence: Mutex<Evidence>,
}

impl FakeCheckpoints {
    pub fn complete(&self) {
        self.evidence.lock().unwrap().complete = true;
    }

    pub fn block(&self) {
        self.evidence.lock().unwrap().blocked = true;
    }

    pub fn write_checkpoint(&self, stamp_ms: i64) {
        self.evidence.lock().unwrap().latest = Some(checkpoint(stamp_ms));
    }
}

#[async_trait]
impl Checkpoints for FakeCheckpoints {
    async fn has_new_checkpoint(&self, _chain: &Chain, since: Option<&CheckpointRef>) -> Result<Option<CheckpointRef>, CheckpointError> {
        let evidence = self.evidence.lock().unwrap();
        Ok(evidence.latest.clone().filter(|latest| latest.is_newer_than(since)))
    }

    async fn is_simulation_complete(&self, _chain: &Chain) -> Result<bool, CheckpointError> {
        Ok(self.evidence.lock().unwrap().complete)
    }

    async fn restart_blocked(&self, _chain: &Chain) -> Result<bool, CheckpointError> {
        Ok(self.evidence.lock().unwrap().blocked)
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { now: Mutex::new(start()) }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        let mut now = self.now.lock().unwrap();
        *now = *now + chrono::Duration::minutes(minutes);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn checkpoint(stamp_ms: i64) -> CheckpointRef {
    CheckpointRef { path: "/scratch/md/md.cpt".to_string(), stamp_ms }
}

pub fn policy() -> Policy {
    Policy {
        max_consecutive_failures: 1,
        max_chain_length: 10,
        grace_margin: chrono::Duration::minutes(5),
        max_submit_attempts: 2,
        max_inconclusive_polls: 3,
    }
}

/// Request for a GROMACS run with one hour jobs
pub fn request(id: &str) -> ChainRequest {
    let mut resources = Config::sample().resources;
    resources.time = "01:00:00".to_string();
    ChainRequest {
        id: id.to_string(),
        simulation: Simulation {
            workdir: "/scratch/md".to_string(),
            preload: Some("module load gromacs".to_string()),
            executable: "srun gmx_mpi mdrun".to_string(),
            args: "-deffnm md".to_string(),
            resume_args: Some("-cpi {checkpoint}".to_string()),
            completion_marker: "md.gro".to_string(),
        },
        resources,
        requested_at: start(),
    }
}

/// Everything a daemon under test talks to
pub struct Harness {
    pub scheduler: Arc<ScriptedScheduler>,
    pub checkpoints: Arc<FakeCheckpoints>,
    pub clock: Arc<ManualClock>,
    pub store: MemoryStore,
}

impl Harness {
    pub fn new() -> Self {
        Harness {
            scheduler: Arc::new(ScriptedScheduler::default()),
            checkpoints: Arc::new(FakeCheckpoints::default()),
            clock: Arc::new(ManualClock::new()),
            store: MemoryStore::new(),
        }
    }

    /// Same collaborators, state taken from an earlier store
    pub fn restarted_from(store: MemoryStore) -> Self {
        Harness { store, ..Harness::new() }
    }

    pub fn enqueue(&mut self, request: &ChainRequest) {
        self.store.enqueue(request).unwrap();
    }

    pub fn daemon(&self, policy: Policy) -> Daemon {
        self.try_daemon(policy).unwrap()
    }

    pub fn try_daemon(&self, policy: Policy) -> Result<Daemon, DaemonError> {
        let services = Services {
            scheduler: self.scheduler.clone(),
            checkpoints: self.checkpoints.clone(),
            clock: self.clock.clone(),
        };
        let settings = Settings { poll_interval: Duration::from_millis(1), exit_when_idle: true, policy };
        Daemon::new(services, Box::new(self.store.clone()), settings)
    }

    pub fn chain(&self, id: &str) -> Chain {
        self.store.snapshot().unwrap().chains[id].clone()
    }
}
