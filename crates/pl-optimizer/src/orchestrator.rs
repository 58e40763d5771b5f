//! Job lifecycle and the sequential trial loop.

use dashmap::DashMap;
use parking_lot::RwLock;
use pl_types::{
    Job, JobError, JobRequest, JobStatus, OptimizationMetrics, PlError, PlResult, Trial,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::executor::{ProcessTrialExecutor, TrialRunner};
use crate::persist::StatusPersister;
use crate::search;
use crate::summary;

/// In-memory state of one job.
struct JobEntry {
    job: RwLock<Job>,
    cancel: CancellationToken,
    /// Serializes snapshot writes so the newest state is always written last.
    persist_lock: tokio::sync::Mutex<()>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        Self {
            job: RwLock::new(job),
            cancel: CancellationToken::new(),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Job {
        self.job.read().clone()
    }

    fn id(&self) -> String {
        self.job.read().id.clone()
    }
}

/// Owns every optimization job of this process.
///
/// Jobs run their trials strictly one after another; several jobs may run
/// concurrently, each driven by its own caller or task. Every state change is
/// followed by a status snapshot.
pub struct Orchestrator {
    config: OrchestratorConfig,
    runner: Arc<dyn TrialRunner>,
    persister: StatusPersister,
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl Orchestrator {
    /// Orchestrator launching the configured trainer for each trial.
    pub fn new(config: OrchestratorConfig) -> PlResult<Self> {
        config.validate()?;
        let runner = Arc::new(ProcessTrialExecutor::new(config.clone()));
        Ok(Self::with_runner(config, runner))
    }

    pub fn with_runner(config: OrchestratorConfig, runner: Arc<dyn TrialRunner>) -> Self {
        let persister = StatusPersister::from_config(&config);
        Self {
            config,
            runner,
            persister,
            jobs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn persister(&self) -> &StatusPersister {
        &self.persister
    }

    /// Create a job and run all of its trials before returning.
    ///
    /// Validation and output-directory failures are returned before any job
    /// exists. A failed trial never fails the job.
    pub async fn submit(&self, request: JobRequest) -> PlResult<Job> {
        let entry = self.prepare(request).await?;
        self.run_trials(&entry).await?;
        Ok(entry.snapshot())
    }

    /// Create a job and run its trials on a background task.
    ///
    /// Returns the freshly persisted `pending` job and the task handle, which
    /// resolves to the final job.
    pub async fn spawn(
        self: &Arc<Self>,
        request: JobRequest,
    ) -> PlResult<(Job, JoinHandle<PlResult<Job>>)> {
        let entry = self.prepare(request).await?;
        let initial = entry.snapshot();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_trials(&entry).await?;
            Ok(entry.snapshot())
        });
        Ok((initial, handle))
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|entry| entry.snapshot())
    }

    /// Every known job, newest first. Jobs without a start time sort last.
    pub fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.snapshot()).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Cancel a pending or running job.
    ///
    /// Returns `false` when the job is unknown or already finished. The job
    /// is marked cancelled and persisted immediately; its live trial process
    /// is killed and no further trial is dispatched.
    pub async fn cancel(&self, job_id: &str) -> PlResult<bool> {
        let Some(entry) = self.jobs.get(job_id).map(|e| Arc::clone(e.value())) else {
            return Ok(false);
        };

        {
            let mut job = entry.job.write();
            if job.is_terminal() {
                return Ok(false);
            }
            job.mark_cancelled();
        }
        entry.cancel.cancel();
        info!(job_id = %job_id, "optimization job cancelled");

        self.persist(&entry).await?;
        Ok(true)
    }

    /// Statistics over all completed jobs.
    pub fn metrics_summary(&self) -> OptimizationMetrics {
        let jobs = self.list_all();
        summary::summarize(&jobs)
    }

    /// Load persisted snapshots into the job table.
    ///
    /// Jobs already known in memory are left alone. Snapshots still pending or
    /// running belonged to a trial loop that no longer exists; they are closed
    /// out as errors and re-persisted. Returns the number of jobs loaded.
    pub async fn recover(&self) -> PlResult<usize> {
        let mut restored = 0;
        for mut job in self.persister.load_all().await? {
            if self.jobs.contains_key(&job.id) {
                continue;
            }
            let interrupted = !job.is_terminal();
            if interrupted {
                warn!(job_id = %job.id, status = ?job.status, "closing out interrupted job");
                job.mark_interrupted();
            }

            let id = job.id.clone();
            let entry = Arc::new(JobEntry::new(job));
            if interrupted {
                self.persist(&entry).await?;
            }
            self.jobs.insert(id, entry);
            restored += 1;
        }
        info!(restored, dir = %self.persister.dir().display(), "recovered optimization jobs");
        Ok(restored)
    }

    async fn prepare(&self, request: JobRequest) -> PlResult<Arc<JobEntry>> {
        request.validate()?;

        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| JobError::OutputDir {
                path: request.output_dir.display().to_string(),
                message: e.to_string(),
            })?;
        self.persister.ensure_dir().await?;

        let job = Job::new(request);
        let id = job.id.clone();
        info!(
            job_id = %id,
            name = %job.name,
            strategy = %job.strategy,
            max_trials = job.max_trials,
            "starting optimization job"
        );

        let entry = Arc::new(JobEntry::new(job));
        self.jobs.insert(id.clone(), Arc::clone(&entry));
        if let Err(e) = self.write_snapshot(&entry).await {
            self.jobs.remove(&id);
            return Err(e);
        }
        Ok(entry)
    }

    async fn run_trials(&self, entry: &JobEntry) -> PlResult<()> {
        let plan = {
            let mut job = entry.job.write();
            job.mark_running();
            job.clone()
        };
        if plan.status != JobStatus::Running {
            return Ok(());
        }
        self.persist(entry).await?;

        for index in 0..plan.max_trials {
            if entry.cancel.is_cancelled() {
                info!(job_id = %plan.id, next_trial = index + 1, "stopping trial loop after cancellation");
                return Ok(());
            }

            let trial_number = index + 1;
            let hyperparameters = search::sample(&plan.config, plan.strategy, index);
            let mut trial = Trial::new(
                trial_number,
                hyperparameters,
                plan.trial_output_path(trial_number),
            );
            {
                let mut job = entry.job.write();
                if job.is_terminal() {
                    return Ok(());
                }
                job.begin_trial(trial.clone());
            }
            info!(
                job_id = %plan.id,
                trial = trial_number,
                params = ?trial.hyperparameters,
                "dispatching trial"
            );

            match self.runner.run(&plan, &mut trial, &entry.cancel).await {
                Ok(()) => {
                    trial.mark_completed();
                    info!(
                        job_id = %plan.id,
                        trial = trial_number,
                        accuracy = trial.metrics.accuracy,
                        training_time = trial.training_time,
                        "trial completed"
                    );
                }
                Err(e) => {
                    error!(job_id = %plan.id, trial_id = %trial.id, error = %e, "trial failed");
                    let reason = match e {
                        PlError::Trial(trial_error) => trial_error.to_string(),
                        other => other.to_string(),
                    };
                    trial.mark_failed(reason);
                }
            }

            entry.job.write().finish_trial(trial);
            self.persist(entry).await?;
        }

        let completed = {
            let mut job = entry.job.write();
            let was_running = job.status == JobStatus::Running;
            job.mark_completed();
            was_running
        };
        if completed {
            self.persist(entry).await?;
            let best_accuracy = entry
                .job
                .read()
                .best_trial
                .as_ref()
                .map(|t| t.metrics.accuracy);
            info!(job_id = %plan.id, ?best_accuracy, "optimization completed");
        }
        Ok(())
    }

    /// Persist the entry; on failure the job is moved to `error` and its loop
    /// stopped, since memory and disk can no longer be kept in step.
    async fn persist(&self, entry: &JobEntry) -> PlResult<()> {
        if let Err(e) = self.write_snapshot(entry).await {
            error!(job_id = %entry.id(), error = %e, "failed to persist job status");
            entry
                .job
                .write()
                .mark_error(format!("Status persistence failed: {e}"));
            entry.cancel.cancel();
            return Err(e);
        }
        Ok(())
    }

    async fn write_snapshot(&self, entry: &JobEntry) -> PlResult<()> {
        let _guard = entry.persist_lock.lock().await;
        let snapshot = entry.snapshot();
        self.persister.persist(&snapshot).await
    }
}
