//! # pl-optimizer
//!
//! Hyperparameter search orchestration for Persian-language model training.
//!
//! Samples hyperparameters per trial (grid, random, bayesian), launches one
//! external training process per trial, scrapes metrics from its output,
//! tracks the best trial and persists a JSON status snapshot after every
//! state change.

mod config;
mod executor;
mod metrics;
mod orchestrator;
mod persist;
mod search;
mod summary;

pub use config::{
    OrchestratorConfig, ENV_LOGS_DIR, ENV_TRAINER_ARGS, ENV_TRAINER_PROGRAM,
    ENV_TRIAL_TIMEOUT_SECS,
};
pub use executor::{
    InterleavedLog, LogCollector, OutputStream, ProcessTrialExecutor, TrialRunner, STDERR_TAG,
};
pub use metrics::extract as extract_metrics;
pub use orchestrator::Orchestrator;
pub use persist::StatusPersister;
pub use search::{grid_values, sample as sample_hyperparameters, sample_with};
pub use summary::summarize;

pub use pl_types::*;
