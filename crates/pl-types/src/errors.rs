use thiserror::Error;

/// Main error type for the optimizer
#[derive(Error, Debug)]
pub enum PlError {
    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while executing a single trial.
///
/// None of these abort the owning job; the orchestrator marks the trial
/// failed and moves on.
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Failed to spawn trainer `{program}`: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Trial process exited with code {exit_code}")]
    ProcessFailed { exit_code: i32 },

    #[error("Trial timed out after {timeout_seconds} seconds")]
    TimedOut { timeout_seconds: u64 },

    #[error("Trial cancelled")]
    Cancelled,

    #[error("Cannot create trial output directory {path}: {message}")]
    OutputDir { path: String, message: String },
}

/// Job-level errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Cannot create output directory {path}: {message}")]
    OutputDir { path: String, message: String },

    #[error("Failed to persist status for job {job_id}: {message}")]
    Persist { job_id: String, message: String },

    #[error("Invalid status snapshot {path}: {message}")]
    InvalidSnapshot { path: String, message: String },
}

/// Result type alias for optimizer operations
pub type PlResult<T> = Result<T, PlError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::PlError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::PlError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TrialError::ProcessFailed { exit_code: 1 };
        assert_eq!(error.to_string(), "Trial process exited with code 1");

        let error = JobError::Persist {
            job_id: "opt_123".to_string(),
            message: "disk full".to_string(),
        };
        assert!(error.to_string().contains("opt_123"));
    }

    #[test]
    fn test_error_conversion() {
        let trial_error = TrialError::TimedOut { timeout_seconds: 30 };
        let pl_error: PlError = trial_error.into();

        match pl_error {
            PlError::Trial(TrialError::TimedOut { timeout_seconds }) => {
                assert_eq!(timeout_seconds, 30)
            }
            _ => panic!("Expected Trial error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, PlError::Validation(ref m) if m == "Invalid value: 42"));
        let _config_err = config_error!("Missing required field: {}", "trainer_program");
    }
}
