//! Chains of scheduler jobs carrying one simulation to its end
//!
//! A chain is created in PENDING_SUBMIT, gets one job at a time and ends in CHAIN_DONE or
//! CHAIN_ABORTED. All mutation goes through the [tracker::Tracker].

/// One scheduler job in a chain
pub mod job;
/// Chain phases and the summary shown by `jatko status`
pub mod state;
/// The chain record and the simulation it runs
pub mod record;
/// State machine deciding what happens to a chain next
pub mod tracker;

pub use job::{Job, Outcome};
pub use record::{valid_chain_id, Chain, Simulation};
pub use state::{Phase, Summary};
pub use tracker::{Admission, ChainError, Policy, Resolution, Tracker, Transition};
