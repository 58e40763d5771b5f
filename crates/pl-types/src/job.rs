//! Optimization jobs, trials and their outcomes.
//!
//! Field names serialize in camelCase so status snapshots stay readable by
//! the dashboard that consumes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::PlResult;
use crate::search::{HyperparameterConfig, Hyperparameters, SearchStrategy};
use crate::validation_error;

/// Trial budget used when a request does not name one.
pub const DEFAULT_MAX_TRIALS: usize = 10;

/// Message recorded on a job cancelled through the API.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Message recorded on jobs whose trial loop died with a previous process.
pub const INTERRUPTED: &str = "Interrupted before completion";

fn default_max_trials() -> usize {
    DEFAULT_MAX_TRIALS
}

/// Everything a caller supplies to start an optimization job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub name: String,
    pub base_model_path: String,
    pub dataset_path: String,
    pub output_dir: PathBuf,
    pub config: HyperparameterConfig,
    #[serde(default)]
    pub strategy: SearchStrategy,
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,
}

impl JobRequest {
    pub fn new(
        name: impl Into<String>,
        base_model_path: impl Into<String>,
        dataset_path: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        config: HyperparameterConfig,
    ) -> Self {
        Self {
            name: name.into(),
            base_model_path: base_model_path.into(),
            dataset_path: dataset_path.into(),
            output_dir: output_dir.into(),
            config,
            strategy: SearchStrategy::default(),
            max_trials: DEFAULT_MAX_TRIALS,
        }
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn validate(&self) -> PlResult<()> {
        let required = [
            ("name", self.name.trim().is_empty()),
            ("baseModelPath", self.base_model_path.trim().is_empty()),
            ("datasetPath", self.dataset_path.trim().is_empty()),
            ("outputDir", self.output_dir.as_os_str().is_empty()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(validation_error!("missing required field: {field}"));
        }
        if self.max_trials == 0 {
            return Err(validation_error!("maxTrials must be at least 1"));
        }
        self.config.validate()
    }
}

/// Lifecycle state of a job. `Pending` is the only initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Running,
    Completed,
    Failed,
}

/// Numeric outcomes scraped from a trial's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub f1_score: f64,
    pub precision: f64,
    pub recall: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perplexity: Option<f64>,
}

/// One sampled hyperparameter set and its single execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub id: String,
    /// 1-based, sequential within a job.
    pub trial_number: usize,
    pub hyperparameters: Hyperparameters,
    pub metrics: TrialMetrics,
    /// Wall-clock seconds of the external execution.
    pub training_time: u64,
    pub status: TrialStatus,
    pub output_path: PathBuf,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Trial {
    pub fn new(trial_number: usize, hyperparameters: Hyperparameters, output_path: PathBuf) -> Self {
        Self {
            id: format!("trial_{}", Uuid::new_v4().simple()),
            trial_number,
            hyperparameters,
            metrics: TrialMetrics::default(),
            training_time: 0,
            status: TrialStatus::Running,
            output_path,
            logs: Vec::new(),
            error: None,
        }
    }

    pub fn mark_completed(&mut self) {
        if self.status == TrialStatus::Running {
            self.status = TrialStatus::Completed;
        }
    }

    pub fn mark_failed(&mut self, error: String) {
        if self.status == TrialStatus::Running {
            self.status = TrialStatus::Failed;
            self.error = Some(error);
        }
    }
}

/// One hyperparameter-search run, bounded by `max_trials`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub base_model_path: String,
    pub dataset_path: String,
    pub output_dir: PathBuf,
    pub config: HyperparameterConfig,
    pub strategy: SearchStrategy,
    pub max_trials: usize,
    pub status: JobStatus,
    /// 0-100, `round(current_trial / max_trials * 100)`.
    pub progress: u8,
    pub current_trial: usize,
    pub total_trials: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_trial: Option<Trial>,
    pub trials: Vec<Trial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: format!("opt_{}", Uuid::new_v4().simple()),
            name: request.name,
            base_model_path: request.base_model_path,
            dataset_path: request.dataset_path,
            output_dir: request.output_dir,
            config: request.config,
            strategy: request.strategy,
            max_trials: request.max_trials,
            status: JobStatus::Pending,
            progress: 0,
            current_trial: 0,
            total_trials: request.max_trials,
            best_trial: None,
            trials: Vec::new(),
            started_at: Some(Utc::now()),
            finished_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Output directory of the trial with the given number.
    pub fn trial_output_path(&self, trial_number: usize) -> PathBuf {
        self.output_dir.join(format!("trial_{trial_number}"))
    }

    pub fn mark_running(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
        }
    }

    /// Append a freshly dispatched trial and advance progress.
    pub fn begin_trial(&mut self, trial: Trial) {
        self.current_trial = trial.trial_number;
        self.progress = progress_percent(self.current_trial, self.max_trials);
        self.trials.push(trial);
    }

    /// Store the final state of a dispatched trial and update the best trial.
    pub fn finish_trial(&mut self, trial: Trial) {
        self.update_best(&trial);
        if let Some(slot) = self
            .trials
            .iter_mut()
            .find(|t| t.trial_number == trial.trial_number)
        {
            *slot = trial;
        }
    }

    /// Replace the best trial if `trial` completed with strictly higher
    /// accuracy. Ties keep the earlier trial.
    pub fn update_best(&mut self, trial: &Trial) {
        if trial.status != TrialStatus::Completed {
            return;
        }
        let improves = match &self.best_trial {
            None => true,
            Some(best) => trial.metrics.accuracy > best.metrics.accuracy,
        };
        if improves {
            self.best_trial = Some(trial.clone());
        }
    }

    pub fn mark_completed(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::Completed;
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn mark_cancelled(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::Cancelled;
            self.error = Some(CANCELLED_BY_USER.to_string());
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn mark_error(&mut self, error: String) {
        if !self.is_terminal() {
            self.status = JobStatus::Error;
            self.error = Some(error);
            self.finished_at = Some(Utc::now());
        }
    }

    /// Close out a job found mid-flight after a restart: in-flight trials
    /// fail and the job ends in `error`.
    pub fn mark_interrupted(&mut self) {
        if self.is_terminal() {
            return;
        }
        for trial in &mut self.trials {
            trial.mark_failed(INTERRUPTED.to_string());
        }
        self.mark_error(INTERRUPTED.to_string());
    }
}

fn progress_percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Aggregate statistics over completed jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationMetrics {
    pub total_optimizations: usize,
    /// Mean percentage gain of the best trial over the first trial.
    pub average_improvement: f64,
    pub best_model_accuracy: f64,
    /// Hours.
    pub total_training_time: f64,
    pub successful_trials: usize,
    pub failed_trials: usize,
    /// Minutes.
    pub average_trial_time: f64,
}
