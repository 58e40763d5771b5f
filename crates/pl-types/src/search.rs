//! Hyperparameter search space definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{PlError, PlResult};
use crate::validation_error;

/// How a continuous range is sampled by the random strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    #[default]
    Uniform,
    /// Sampled in log-space then exponentiated.
    LogUniform,
}

/// Learning rate range with optional grid resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateRange {
    pub min: f64,
    pub max: f64,
    /// Number of evenly spaced grid points (defaults to 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
}

/// Continuous range [min, max].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
}

/// Integer range [min, max] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub min: u32,
    pub max: u32,
}

/// Declarative search space for one optimization job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperparameterConfig {
    pub learning_rate: LearningRateRange,
    /// Candidate batch sizes, cycled round-robin by trial index.
    pub batch_size: Vec<u32>,
    pub epochs: IntRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_steps: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<FloatRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropout: Option<FloatRange>,
}

impl HyperparameterConfig {
    pub fn new(learning_rate: LearningRateRange, batch_size: Vec<u32>, epochs: IntRange) -> Self {
        Self {
            learning_rate,
            batch_size,
            epochs,
            warmup_steps: None,
            weight_decay: None,
            dropout: None,
        }
    }

    pub fn with_warmup_steps(mut self, min: u32, max: u32) -> Self {
        self.warmup_steps = Some(IntRange { min, max });
        self
    }

    pub fn with_weight_decay(mut self, min: f64, max: f64) -> Self {
        self.weight_decay = Some(FloatRange { min, max });
        self
    }

    pub fn with_dropout(mut self, min: f64, max: f64) -> Self {
        self.dropout = Some(FloatRange { min, max });
        self
    }

    /// Check the preconditions the sampler relies on.
    pub fn validate(&self) -> PlResult<()> {
        let lr = &self.learning_rate;
        check_float_range("learningRate", lr.min, lr.max)?;
        if lr.step == Some(0) {
            return Err(validation_error!("learningRate.step must be at least 1"));
        }
        if lr.distribution == Some(Distribution::LogUniform) && lr.min <= 0.0 {
            return Err(validation_error!(
                "learningRate.min must be positive for log_uniform sampling, got {}",
                lr.min
            ));
        }

        if self.batch_size.is_empty() {
            return Err(validation_error!("batchSize must list at least one candidate"));
        }
        if self.batch_size.contains(&0) {
            return Err(validation_error!("batchSize candidates must be positive"));
        }

        check_int_range("epochs", &self.epochs)?;
        if let Some(range) = &self.warmup_steps {
            check_int_range("warmupSteps", range)?;
        }
        if let Some(range) = &self.weight_decay {
            check_float_range("weightDecay", range.min, range.max)?;
        }
        if let Some(range) = &self.dropout {
            check_float_range("dropout", range.min, range.max)?;
        }
        Ok(())
    }
}

fn check_float_range(name: &str, min: f64, max: f64) -> PlResult<()> {
    if !min.is_finite() || !max.is_finite() {
        return Err(validation_error!("{name} bounds must be finite"));
    }
    if min > max {
        return Err(validation_error!("{name}: min {min} exceeds max {max}"));
    }
    Ok(())
}

fn check_int_range(name: &str, range: &IntRange) -> PlResult<()> {
    if range.min > range.max {
        return Err(validation_error!(
            "{name}: min {} exceeds max {}",
            range.min,
            range.max
        ));
    }
    Ok(())
}

/// Sampling policy used to pick each trial's hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Grid,
    #[default]
    Random,
    /// Linear placeholder, not a surrogate model.
    Bayesian,
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Grid => "grid",
            Self::Random => "random",
            Self::Bayesian => "bayesian",
        };
        f.write_str(name)
    }
}

impl FromStr for SearchStrategy {
    type Err = PlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "random" => Ok(Self::Random),
            "bayesian" => Ok(Self::Bayesian),
            other => Err(validation_error!("unknown search strategy: {other}")),
        }
    }
}

/// One concrete hyperparameter set, as handed to the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub batch_size: u32,
    pub epochs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropout: Option<f64>,
}

impl Hyperparameters {
    /// Render as `--flag value` pairs; optional values only when present.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--epochs".to_string(),
            self.epochs.to_string(),
            "--lr".to_string(),
            self.learning_rate.to_string(),
            "--batch-size".to_string(),
            self.batch_size.to_string(),
        ];
        if let Some(steps) = self.warmup_steps {
            args.push("--warmup-steps".to_string());
            args.push(steps.to_string());
        }
        if let Some(decay) = self.weight_decay {
            args.push("--weight-decay".to_string());
            args.push(decay.to_string());
        }
        if let Some(dropout) = self.dropout {
            args.push("--dropout".to_string());
            args.push(dropout.to_string());
        }
        args
    }
}
