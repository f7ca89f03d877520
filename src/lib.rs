//! jatko keeps a long running simulation going across wall-time limited batch jobs
//!
//! Each simulation is a chain of scheduler jobs. The daemon polls the scheduler over ssh,
//! decides from the job outcome and the simulation's checkpoints whether to continue, and
//! submits the next job from the newest checkpoint until the simulation is done.

/// Chains, jobs and the state machine driving them
pub mod chain;
/// Checkpoint and marker evidence from the simulation directory
pub mod checkpoint;
/// Configuration file
pub mod config;
/// The polling loop
pub mod daemon;
/// Output of `jatko status`
pub mod format;
/// Running shell commands on the cluster
pub mod remote;
/// Batch scheduler adapter
pub mod scheduler;
/// Persisted daemon state
pub mod store;
/// Batch script rendering
pub mod submit;
/// TinyTemplate rendering shared by scripts and command templates
pub mod template;
