//! The polling loop
//!
//! One cycle: take in queued chain requests, poll every active chain (one task per chain),
//! resolve chains whose job has ended, persist, then submit the next job of every chain that
//! needs one, persisting around each submission. Between cycles the daemon sleeps or stops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chain::{Admission, Chain, ChainError, Phase, Policy, Resolution, Tracker, Transition};
use crate::checkpoint::{CheckpointError, Checkpoints, RemoteCheckpoints};
use crate::config::Config;
use crate::remote::{Executor, LocalExecutor, RetryPolicy, RetryingExecutor, SshExecutor};
use crate::scheduler::{BatchScheduler, SchedulerError, TemplateScheduler};
use crate::store::{DaemonState, StateStore, StoreError};
use crate::submit::SubmissionBuilder;

/// Time source
pub mod clock;
/// Single daemon per state directory
pub mod lock;
/// SIGTERM and SIGINT handling
pub mod shutdown;

use clock::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("can't set up daemon: {0}")]
    Setup(String),

    #[error("{path} is held by daemon {pid}")]
    Locked { path: PathBuf, pid: String },

    #[error("can't write lock {path}: {source}")]
    Lock { path: PathBuf, source: std::io::Error },
}

/// Collaborators the daemon talks to
#[derive(Clone)]
pub struct Services {
    pub scheduler: Arc<dyn BatchScheduler>,
    pub checkpoints: Arc<dyn Checkpoints>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub poll_interval: Duration,
    pub exit_when_idle: bool,
    pub policy: Policy,
}

pub struct Daemon {
    services: Services,
    store: Box<dyn StateStore>,
    settings: Settings,
    tracker: Tracker,
    builder: SubmissionBuilder,
    state: DaemonState,
}

impl Daemon {
    /// Load persisted state, a corrupt store is fatal
    pub fn new(services: Services, store: Box<dyn StateStore>, settings: Settings) -> Result<Daemon, DaemonError> {
        let state = store.load()?;
        info!("Loaded {} chains, {} still running", state.chains.len(), state.live());

        Ok(Daemon {
            tracker: Tracker::new(settings.policy.clone()),
            builder: SubmissionBuilder::new(),
            services,
            store,
            settings,
            state,
        })
    }

    /// Wire up ssh (or local) execution, the template scheduler and remote checkpoints
    pub fn from_config(config: &Config, store: Box<dyn StateStore>) -> Result<Daemon, DaemonError> {
        let retry = RetryPolicy::from_config(&config.remote);
        let executor: Arc<dyn Executor> = match config.cluster.remote_host() {
            Some(host) => Arc::new(RetryingExecutor::new(SshExecutor::new(host, &config.cluster), retry)),
            None => {
                info!("No remote host configured, running commands locally");
                Arc::new(RetryingExecutor::new(LocalExecutor, retry))
            }
        };
        let timeout = Duration::from_secs(config.remote.command_timeout_secs);

        let scheduler = TemplateScheduler::new(executor.clone(), &config.scheduler, timeout)
            .map_err(|err| DaemonError::Setup(format!("invalid submission pattern: {err}")))?;
        let services = Services {
            scheduler: Arc::new(scheduler),
            checkpoints: Arc::new(RemoteCheckpoints::new(executor, &config.checkpoint, timeout)),
            clock: Arc::new(SystemClock),
        };
        let settings = Settings {
            poll_interval: Duration::from_secs(config.policy.poll_interval_secs),
            exit_when_idle: config.policy.exit_when_idle,
            policy: config.policy.policy().map_err(|err| DaemonError::Setup(err.to_string()))?,
        };

        Daemon::new(services, store, settings)
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Cycle until stopped, or until every chain has ended when configured to exit when idle
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), DaemonError> {
        info!("Polling every {}s", self.settings.poll_interval.as_secs());
        loop {
            let transitions = self.cycle().await?;
            debug!("Cycle done with {transitions} transitions, {} chains running", self.state.live());

            if self.settings.exit_when_idle && self.state.live() == 0 && self.store.pending_requests()?.is_empty() {
                info!("Every chain has ended, stopping");
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stop requested, state is saved");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    /// One full cycle, returning the number of transitions
    pub async fn cycle(&mut self) -> Result<usize, DaemonError> {
        let mut transitions = self.ingest()?;
        transitions += self.poll().await;
        if transitions > 0 {
            self.store.save(&self.state)?;
        }

        let pending: Vec<String> = self
            .state
            .chains
            .values()
            .filter(|chain| chain.phase == Phase::PendingSubmit)
            .map(|chain| chain.id.clone())
            .collect();
        for id in pending {
            transitions += self.submit_next(&id).await?;
        }

        Ok(transitions)
    }

    fn ingest(&mut self) -> Result<usize, DaemonError> {
        let now = self.services.clock.now();
        let mut added = 0;
        for request in self.store.pending_requests()? {
            if self.state.chains.contains_key(&request.id) {
                warn!("Dropping request for existing chain {}", request.id);
                continue;
            }
            info!("Starting chain {} in {}", request.id, request.simulation.workdir);
            let chain = request.into_chain(now);
            self.state.chains.insert(chain.id.clone(), chain);
            added += 1;
        }
        Ok(added)
    }

    /// Poll active chains and resolve ended jobs, one task per chain
    async fn poll(&mut self) -> usize {
        let now = self.services.clock.now();
        let mut tasks = JoinSet::new();
        for chain in self.state.chains.values() {
            if chain.phase == Phase::Active || chain.phase.awaits_resolution() {
                let services = self.services.clone();
                let tracker = self.tracker.clone();
                tasks.spawn(advance(chain.clone(), services, tracker, now));
            }
        }

        let mut transitions = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chain, happened)) => {
                    transitions += happened.len();
                    self.state.chains.insert(chain.id.clone(), chain);
                }
                // the chain keeps its state from before the cycle
                Err(err) => warn!("Polling task failed: {err}"),
            }
        }
        transitions
    }

    /// Submit the next job of one PENDING_SUBMIT chain, persisting before and after
    async fn submit_next(&mut self, id: &str) -> Result<usize, DaemonError> {
        let now = self.services.clock.now();
        let admission = match self.state.chains.get_mut(id) {
            Some(chain) => self.tracker.begin_submission(chain, now)?,
            None => return Ok(0),
        };

        let job_name = match admission {
            Admission::Refused(_) => {
                self.store.save(&self.state)?;
                return Ok(1);
            }
            Admission::Proceed { job_name } => {
                self.store.save(&self.state)?;
                job_name
            }
            Admission::Recover { job_name } => match self.services.scheduler.lookup(&job_name).await {
                Ok(Some(job_id)) => {
                    info!("Chain {id}: adopting job {job_id} submitted before a restart");
                    return self.accept(id, &job_id, &job_name, now);
                }
                Ok(None) => {
                    info!("Chain {id}: {job_name} never reached the scheduler, submitting again");
                    job_name
                }
                Err(err) => return self.reject(id, &err, true, now),
            },
        };

        let built = match self.state.chains.get(id) {
            Some(chain) => self.builder.build(chain, chain.latest_checkpoint.as_ref(), &chain.resources),
            None => return Ok(0),
        };
        let script = match built {
            Ok(script) => script,
            Err(err) => {
                let reason = err.to_string();
                if let Some(chain) = self.state.chains.get_mut(id) {
                    self.tracker.record_submission_failure(chain, &reason, false, now);
                }
                self.store.save(&self.state)?;
                return Ok(1);
            }
        };
        debug_assert_eq!(script.name, job_name);

        match self.services.scheduler.submit(&script).await {
            Ok(job_id) => self.accept(id, &job_id, &script.name, now),
            Err(err) => {
                // the job may exist when the channel broke or the acknowledgement was unreadable
                let maybe_submitted = matches!(err, SchedulerError::Transport(_) | SchedulerError::Submission { .. });
                self.reject(id, &err, maybe_submitted, now)
            }
        }
    }

    fn accept(&mut self, id: &str, job_id: &str, job_name: &str, now: DateTime<Utc>) -> Result<usize, DaemonError> {
        if let Some(chain) = self.state.chains.get_mut(id) {
            let wall_time_secs = chain.resources.wall_time_secs().ok().flatten();
            self.tracker.record_submission(chain, job_id, job_name, wall_time_secs, now)?;
        }
        self.store.save(&self.state)?;
        Ok(1)
    }

    fn reject(&mut self, id: &str, err: &SchedulerError, keep_marker: bool, now: DateTime<Utc>) -> Result<usize, DaemonError> {
        if let Some(chain) = self.state.chains.get_mut(id) {
            self.tracker.record_submission_failure(chain, &err.to_string(), keep_marker, now);
        }
        self.store.save(&self.state)?;
        Ok(1)
    }
}

/// Poll one chain and, if its job has ended, resolve what comes next
async fn advance(mut chain: Chain, services: Services, tracker: Tracker, now: DateTime<Utc>) -> (Chain, Vec<Transition>) {
    let mut happened = Vec::new();

    if chain.phase == Phase::Active {
        if let Some(transition) = observe(&mut chain, &services, &tracker, now).await {
            happened.push(transition);
        }
        if let Some(Transition::Finished { job_id, cancel: true, .. }) = happened.last() {
            if let Err(err) = services.scheduler.cancel(job_id).await {
                warn!("Chain {}: can't cancel job {job_id}: {err}", chain.id);
            }
        }
    }

    if chain.phase.awaits_resolution() {
        match gather(&chain, services.checkpoints.as_ref()).await {
            Ok(resolution) => happened.extend(tracker.resolve(&mut chain, &resolution, now)),
            Err(err) => warn!("Chain {}: can't check the simulation directory, retrying next cycle: {err}", chain.id),
        }
    }

    (chain, happened)
}

async fn observe(chain: &mut Chain, services: &Services, tracker: &Tracker, now: DateTime<Utc>) -> Option<Transition> {
    let job_id = chain.active_job()?.job_id.clone();

    let poll = match services.scheduler.query(&job_id).await {
        Ok(poll) => poll,
        Err(err) => {
            warn!("Chain {}: can't poll job {job_id}: {err}", chain.id);
            return tracker.inconclusive(chain, now);
        }
    };
    debug!("Chain {}: job {job_id} is {} ({})", chain.id, poll.status, poll.raw);

    let evidence = if poll.status.needs_completion_evidence() {
        match services.checkpoints.is_simulation_complete(chain).await {
            Ok(complete) => Some(complete),
            Err(err) => {
                warn!("Chain {}: can't check completion marker: {err}", chain.id);
                None
            }
        }
    } else {
        None
    };
    tracker.observe(chain, &poll, evidence, now)
}

async fn gather(chain: &Chain, checkpoints: &dyn Checkpoints) -> Result<Resolution, CheckpointError> {
    if matches!(chain.phase, Phase::Completed | Phase::Cancelled) {
        return Ok(Resolution::default());
    }
    if checkpoints.is_simulation_complete(chain).await? {
        return Ok(Resolution { simulation_complete: true, ..Default::default() });
    }

    let restart_blocked = checkpoints.restart_blocked(chain).await?;
    let since = chain.last_job().and_then(|job| job.checkpoint.as_ref());
    let new_checkpoint = checkpoints.has_new_checkpoint(chain, since).await?;
    Ok(Resolution { simulation_complete: false, new_checkpoint, restart_blocked })
}
