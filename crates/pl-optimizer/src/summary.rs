//! Aggregate statistics over finished optimization jobs.

use pl_types::{Job, JobStatus, OptimizationMetrics, TrialStatus};

const SECONDS_PER_HOUR: f64 = 3600.0;
const SECONDS_PER_MINUTE: f64 = 60.0;

/// Summarize every job in `jobs` whose status is `completed`.
///
/// `average_improvement` averages, per job, the percentage gain of the best
/// trial's accuracy over the first trial's. Jobs without a best trial or
/// whose first trial scored zero accuracy are left out of that average.
pub fn summarize<'a, I>(jobs: I) -> OptimizationMetrics
where
    I: IntoIterator<Item = &'a Job>,
{
    let completed: Vec<&Job> = jobs
        .into_iter()
        .filter(|job| job.status == JobStatus::Completed)
        .collect();

    let improvements: Vec<f64> = completed
        .iter()
        .filter_map(|job| improvement_percent(job))
        .collect();
    let average_improvement = if improvements.is_empty() {
        0.0
    } else {
        improvements.iter().sum::<f64>() / improvements.len() as f64
    };

    let total_trials: usize = completed.iter().map(|job| job.trials.len()).sum();
    let successful: Vec<_> = completed
        .iter()
        .flat_map(|job| job.trials.iter())
        .filter(|trial| trial.status == TrialStatus::Completed)
        .collect();

    let best_model_accuracy = successful
        .iter()
        .map(|trial| trial.metrics.accuracy)
        .fold(0.0_f64, f64::max);
    let training_seconds: u64 = successful.iter().map(|trial| trial.training_time).sum();
    let average_trial_time = if successful.is_empty() {
        0.0
    } else {
        training_seconds as f64 / successful.len() as f64 / SECONDS_PER_MINUTE
    };

    OptimizationMetrics {
        total_optimizations: completed.len(),
        average_improvement,
        best_model_accuracy,
        total_training_time: training_seconds as f64 / SECONDS_PER_HOUR,
        successful_trials: successful.len(),
        failed_trials: total_trials - successful.len(),
        average_trial_time,
    }
}

fn improvement_percent(job: &Job) -> Option<f64> {
    let baseline = job.trials.first()?.metrics.accuracy;
    let best = job.best_trial.as_ref()?.metrics.accuracy;
    if baseline == 0.0 {
        return None;
    }
    Some((best - baseline) / baseline * 100.0)
}
