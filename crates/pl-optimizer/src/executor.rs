//! Trial execution: one external training process per trial.
//!
//! The executor launches the trainer, drains stdout and stderr concurrently
//! into a [`LogCollector`], waits for exit (or cancellation, or the optional
//! deadline) and scrapes metrics from the collected lines.

use async_trait::async_trait;
use parking_lot::Mutex;
use pl_types::{Job, PlError, PlResult, Trial, TrialError};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::OrchestratorConfig;
use crate::metrics;

/// Prefix applied to lines read from the trainer's stderr.
pub const STDERR_TAG: &str = "[ERROR]";

/// How long to keep reading output after a process was killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Destination for the lines a trial process prints.
pub trait LogCollector: Send + Sync {
    fn record(&self, stream: OutputStream, line: &str);

    /// Hand over every line recorded so far.
    fn take_lines(&self) -> Vec<String>;
}

/// Keeps lines in arrival order across both pipes.
///
/// The two pipes are read by independent tasks, so the relative order of a
/// stdout line and a stderr line printed close together is not guaranteed.
#[derive(Debug, Default)]
pub struct InterleavedLog {
    lines: Mutex<Vec<String>>,
}

impl LogCollector for InterleavedLog {
    fn record(&self, stream: OutputStream, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let entry = match stream {
            OutputStream::Stdout => line.to_string(),
            OutputStream::Stderr => format!("{STDERR_TAG} {line}"),
        };
        self.lines.lock().push(entry);
    }

    fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

/// Runs one trial to completion, mutating it in place.
#[async_trait]
pub trait TrialRunner: Send + Sync {
    /// Execute `trial` for `job`. Returns an error when the trial failed;
    /// `cancel` aborts the execution.
    async fn run(&self, job: &Job, trial: &mut Trial, cancel: &CancellationToken) -> PlResult<()>;
}

enum WaitOutcome {
    Exited(ExitStatus),
    Cancelled,
    TimedOut(u64),
    WaitFailed(std::io::Error),
}

/// [`TrialRunner`] that launches the configured trainer executable.
#[derive(Debug, Clone)]
pub struct ProcessTrialExecutor {
    config: OrchestratorConfig,
}

impl ProcessTrialExecutor {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    /// Full argument vector for one trial, prefix arguments included.
    pub fn trial_args(&self, job: &Job, trial: &Trial) -> Vec<String> {
        let mut args = self.config.trainer_args.clone();
        args.extend([
            "--job-id".to_string(),
            job.id.clone(),
            "--base-model".to_string(),
            job.base_model_path.clone(),
            "--dataset".to_string(),
            job.dataset_path.clone(),
            "--output".to_string(),
            trial.output_path.to_string_lossy().into_owned(),
        ]);
        args.extend(trial.hyperparameters.to_args());
        args
    }

    /// Like [`TrialRunner::run`], with a caller-supplied log collector.
    pub async fn run_with_log(
        &self,
        job: &Job,
        trial: &mut Trial,
        cancel: &CancellationToken,
        log: Arc<dyn LogCollector>,
    ) -> PlResult<()> {
        if cancel.is_cancelled() {
            return Err(TrialError::Cancelled.into());
        }

        tokio::fs::create_dir_all(&trial.output_path)
            .await
            .map_err(|e| TrialError::OutputDir {
                path: trial.output_path.display().to_string(),
                message: e.to_string(),
            })?;

        let args = self.trial_args(job, trial);
        let mut command = Command::new(&self.config.trainer_program);
        command
            .args(&args)
            .env(&self.config.run_mode_var, &self.config.run_mode_value)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| TrialError::SpawnFailed {
            program: self.config.trainer_program.clone(),
            message: e.to_string(),
        })?;

        info!(
            job_id = %job.id,
            trial = trial.trial_number,
            pid = child.id(),
            "trial process started"
        );

        let mut readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(drain(out, OutputStream::Stdout, log.clone()))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(drain(err, OutputStream::Stderr, log.clone()))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let deadline = self
            .config
            .trial_timeout()
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let outcome = self.wait_for_exit(&mut child, cancel, deadline).await;
        trial.training_time = started.elapsed().as_secs_f64().round() as u64;

        let outcome = match outcome {
            WaitOutcome::Exited(status) => self
                .join_readers(&mut readers, cancel, deadline)
                .await
                .unwrap_or(WaitOutcome::Exited(status)),
            killed => {
                for reader in &mut readers {
                    if tokio::time::timeout(KILL_DRAIN_GRACE, &mut *reader).await.is_err() {
                        reader.abort();
                    }
                }
                killed
            }
        };
        trial.logs.extend(log.take_lines());

        match outcome {
            WaitOutcome::Exited(status) if status.success() => {
                trial.metrics = metrics::extract(&trial.logs);
                debug!(
                    job_id = %job.id,
                    trial = trial.trial_number,
                    accuracy = trial.metrics.accuracy,
                    loss = trial.metrics.loss,
                    "trial metrics extracted"
                );
                Ok(())
            }
            WaitOutcome::Exited(status) => Err(TrialError::ProcessFailed {
                exit_code: status.code().unwrap_or(-1),
            }
            .into()),
            WaitOutcome::Cancelled => Err(TrialError::Cancelled.into()),
            WaitOutcome::TimedOut(timeout_seconds) => {
                Err(TrialError::TimedOut { timeout_seconds }.into())
            }
            WaitOutcome::WaitFailed(e) => Err(PlError::Io(e)),
        }
    }

    async fn wait_for_exit(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> WaitOutcome {
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => WaitOutcome::WaitFailed(e),
            },
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = deadline_elapsed(deadline) => self.timed_out(),
        };

        if matches!(outcome, WaitOutcome::Cancelled | WaitOutcome::TimedOut(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill trial process");
            }
        }
        outcome
    }

    /// Wait for the output readers of a process that exited on its own.
    ///
    /// A background child of the trainer may still hold the pipes open, so
    /// cancellation and the deadline stay armed. Returns the interruption, if
    /// any, after aborting the readers.
    async fn join_readers(
        &self,
        readers: &mut [JoinHandle<()>],
        cancel: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> Option<WaitOutcome> {
        let joined = async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        };
        let interrupted = tokio::select! {
            _ = joined => None,
            _ = cancel.cancelled() => Some(WaitOutcome::Cancelled),
            _ = deadline_elapsed(deadline) => Some(self.timed_out()),
        };
        if interrupted.is_some() {
            warn!("trial output still open after exit, abandoning readers");
            for reader in readers.iter() {
                reader.abort();
            }
        }
        interrupted
    }

    fn timed_out(&self) -> WaitOutcome {
        WaitOutcome::TimedOut(self.config.trial_timeout_secs.unwrap_or_default())
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn deadline_elapsed(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl TrialRunner for ProcessTrialExecutor {
    async fn run(&self, job: &Job, trial: &mut Trial, cancel: &CancellationToken) -> PlResult<()> {
        self.run_with_log(job, trial, cancel, Arc::new(InterleavedLog::default()))
            .await
    }
}

/// Read `reader` line by line into `log` until EOF. Invalid UTF-8 is
/// replaced rather than ending the drain, so the child never blocks on a
/// full pipe.
async fn drain<R>(reader: R, stream: OutputStream, log: Arc<dyn LogCollector>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                trace!(?stream, line = %line.trim_end(), "trial output");
                log.record(stream, &line);
            }
            Err(e) => {
                warn!(?stream, error = %e, "failed reading trial output");
                break;
            }
        }
    }
}
