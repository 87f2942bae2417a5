use std::fmt;

/// Per-ticker failure. Every variant ends with the ticker being skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForecastError {
    InsufficientHistory { rows: usize, required: usize },
    GroundTruthMissing { month: String },
    TuningFailure(String),
    TrainingFailure(String),
}

impl ForecastError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::InsufficientHistory { .. } => "insufficient_history",
            ForecastError::GroundTruthMissing { .. } => "ground_truth_missing",
            ForecastError::TuningFailure(_) => "tuning_failure",
            ForecastError::TrainingFailure(_) => "training_failure",
        }
    }
}

impl fmt::Display for ForecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastError::InsufficientHistory { rows, required } => write!(
                f,
                "insufficient history: {rows} rows, at least {required} required"
            ),
            ForecastError::GroundTruthMissing { month } => {
                write!(f, "no observation in target month {month}")
            }
            ForecastError::TuningFailure(cause) => write!(f, "tuning failed: {cause}"),
            ForecastError::TrainingFailure(cause) => write!(f, "training failed: {cause}"),
        }
    }
}

impl std::error::Error for ForecastError {}
