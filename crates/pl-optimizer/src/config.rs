//! Runtime configuration for the orchestrator and its trial executor.

use pl_types::{config_error, PlResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_LOGS_DIR: &str = "PL_LOGS_DIR";
pub const ENV_TRAINER_PROGRAM: &str = "PL_TRAINER_PROGRAM";
pub const ENV_TRAINER_ARGS: &str = "PL_TRAINER_ARGS";
pub const ENV_TRIAL_TIMEOUT_SECS: &str = "PL_TRIAL_TIMEOUT_SECS";

const STATUS_SUBDIR: &str = "optimization";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root of the log tree; snapshots live under `<logs_dir>/optimization`.
    pub logs_dir: PathBuf,

    /// Executable that runs one training trial.
    pub trainer_program: String,

    /// Arguments placed before the per-trial flags (e.g. the script path).
    pub trainer_args: Vec<String>,

    /// Environment variable marking the child as an optimization trial.
    pub run_mode_var: String,
    pub run_mode_value: String,

    /// Kill a trial whose process outlives this many seconds.
    pub trial_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            trainer_program: "ts-node".to_string(),
            trainer_args: vec!["scripts/train_minimal.ts".to_string()],
            run_mode_var: "NODE_ENV".to_string(),
            run_mode_value: "optimization".to_string(),
            trial_timeout_secs: None,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `PL_*` environment variables.
    pub fn from_env() -> PlResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> PlResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_LOGS_DIR) {
            config.logs_dir = PathBuf::from(dir);
        }
        if let Some(program) = lookup(ENV_TRAINER_PROGRAM) {
            config.trainer_program = program;
        }
        if let Some(args) = lookup(ENV_TRAINER_ARGS) {
            config.trainer_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = lookup(ENV_TRIAL_TIMEOUT_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                config_error!("{ENV_TRIAL_TIMEOUT_SECS} must be a whole number of seconds: {e}")
            })?;
            config.trial_timeout_secs = Some(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    pub fn with_trainer(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.trainer_program = program.into();
        self.trainer_args = args;
        self
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn validate(&self) -> PlResult<()> {
        if self.trainer_program.trim().is_empty() {
            return Err(config_error!("trainer program must not be empty"));
        }
        if self.run_mode_var.is_empty() || self.run_mode_var.contains('=') {
            return Err(config_error!("invalid run mode variable: {:?}", self.run_mode_var));
        }
        if self.trial_timeout_secs == Some(0) {
            return Err(config_error!("trial timeout must be at least one second"));
        }
        Ok(())
    }

    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_secs.map(Duration::from_secs)
    }

    /// Directory holding one JSON snapshot per job.
    pub fn status_dir(&self) -> PathBuf {
        self.logs_dir.join(STATUS_SUBDIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.trainer_program, "ts-node");
        assert_eq!(config.run_mode_var, "NODE_ENV");
        assert_eq!(config.run_mode_value, "optimization");
        assert_eq!(config.status_dir(), PathBuf::from("logs/optimization"));
        assert!(config.trial_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[
            (ENV_LOGS_DIR, "/var/log/pl"),
            (ENV_TRAINER_PROGRAM, "python3"),
            (ENV_TRAINER_ARGS, "train.py  --quiet"),
            (ENV_TRIAL_TIMEOUT_SECS, "900"),
        ]))
        .unwrap();
        assert_eq!(config.status_dir(), PathBuf::from("/var/log/pl/optimization"));
        assert_eq!(config.trainer_program, "python3");
        assert_eq!(config.trainer_args, vec!["train.py", "--quiet"]);
        assert_eq!(config.trial_timeout(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn bad_timeout_rejected() {
        let result = OrchestratorConfig::from_lookup(lookup_from(&[(ENV_TRIAL_TIMEOUT_SECS, "soon")]));
        assert!(result.is_err());

        let result = OrchestratorConfig::from_lookup(lookup_from(&[(ENV_TRIAL_TIMEOUT_SECS, "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn empty_program_rejected() {
        let config = OrchestratorConfig::default().with_trainer("  ", Vec::new());
        assert!(config.validate().is_err());
    }
}
