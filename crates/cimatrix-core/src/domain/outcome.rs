//! Per-step, per-leg and per-build results.

use cimatrix_state::BuildStatus;
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, PipelineError};
use super::leg::MatrixLeg;

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,

    /// Exit code (0 = success, -1 = could not run).
    pub exit_code: i32,

    pub duration_ms: u64,

    /// Last lines of combined output, kept for reports.
    #[serde(default)]
    pub output_tail: String,
}

impl StepResult {
    pub fn new(step_name: impl Into<String>, exit_code: i32, duration_ms: u64) -> Self {
        Self {
            step_name: step_name.into(),
            exit_code,
            duration_ms,
            output_tail: String::new(),
        }
    }

    pub fn with_output_tail(mut self, tail: impl Into<String>) -> Self {
        self.output_tail = tail.into();
        self
    }

    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Terminal state of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Passed,
    Failed,
    Cancelled,
}

/// Why a leg ended early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for LegFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Everything one leg produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegReport {
    /// Position in the expanded matrix.
    pub index: usize,
    pub leg: MatrixLeg,
    pub steps: Vec<StepResult>,
    pub status: LegStatus,
    pub failure: Option<LegFailure>,
    pub duration_ms: u64,
}

impl LegReport {
    pub fn passed(index: usize, leg: MatrixLeg, steps: Vec<StepResult>, duration_ms: u64) -> Self {
        Self {
            index,
            leg,
            steps,
            status: LegStatus::Passed,
            failure: None,
            duration_ms,
        }
    }

    pub fn failed(
        index: usize,
        leg: MatrixLeg,
        steps: Vec<StepResult>,
        err: &PipelineError,
        duration_ms: u64,
    ) -> Self {
        let status = if matches!(err, PipelineError::Cancelled) {
            LegStatus::Cancelled
        } else {
            LegStatus::Failed
        };
        Self {
            index,
            leg,
            steps,
            status,
            failure: Some(LegFailure::from(err)),
            duration_ms,
        }
    }

    /// A leg passes only if it reached the end and every step exited 0.
    pub fn is_success(&self) -> bool {
        self.status == LegStatus::Passed && self.steps.iter().all(StepResult::passed)
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_name == name)
    }
}

/// Aggregate of every leg for one triggering event.
///
/// This is the single join point read by the post-build stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub build_id: String,
    pub matrix_digest: String,
    /// Legs in matrix order.
    pub legs: Vec<LegReport>,
    /// Index of the leg whose success authorises post-build actions.
    pub leg_index_of_record: usize,
    pub cancelled: bool,
}

impl BuildOutcome {
    /// True iff the build was not cancelled and every leg's every step passed.
    pub fn success(&self) -> bool {
        !self.cancelled && !self.legs.is_empty() && self.legs.iter().all(LegReport::is_success)
    }

    pub fn status(&self) -> BuildStatus {
        if self.cancelled {
            BuildStatus::Cancelled
        } else if self.success() {
            BuildStatus::Passed
        } else {
            BuildStatus::Failed
        }
    }

    pub fn record_leg(&self) -> Option<&LegReport> {
        self.legs.iter().find(|l| l.index == self.leg_index_of_record)
    }

    pub fn failed_legs(&self) -> impl Iterator<Item = &LegReport> {
        self.legs.iter().filter(|l| !l.is_success())
    }

    pub fn passed_count(&self) -> usize {
        self.legs.iter().filter(|l| l.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.legs.len() - self.passed_count()
    }
}
