use super::diagnostics::Stage;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    Completed,
    /// Output came from the build cache
    Cached,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Cached => write!(f, "cached"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Receives one call per pipeline state transition
pub trait ProgressListener: Send + Sync {
    fn on_transition(&self, stage: Stage, status: StageStatus);
}

impl<F> ProgressListener for F
where
    F: Fn(Stage, StageStatus) + Send + Sync,
{
    fn on_transition(&self, stage: Stage, status: StageStatus) {
        self(stage, status)
    }
}
