//! Build report: the joined outcome plus what the post-build stages did.

use cimatrix_state::BuildStatus;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use super::leg::MatrixLeg;
use super::outcome::BuildOutcome;
use super::trigger::Trigger;

/// Documentation publish state machine.
///
/// `NotEvaluated -> GateFalse | Pushed | Failed`; the `Building` phase is
/// transient and never appears in a finished report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocsPublishState {
    NotEvaluated,
    GateFalse { reasons: Vec<String> },
    Pushed { branch: String },
    Failed { reason: String },
}

impl DocsPublishState {
    pub fn is_pushed(&self) -> bool {
        matches!(self, DocsPublishState::Pushed { .. })
    }
}

/// Effective result of one `ensure_published` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeployState {
    Published { coordinate: String },
    AlreadyPublished { coordinate: String },
    Rejected { reason: String },
}

impl DeployState {
    pub fn is_success(&self) -> bool {
        !matches!(self, DeployState::Rejected { .. })
    }
}

/// One deploy attempt, attributed to the leg that made it (if per-leg).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployAttempt {
    pub leg: Option<MatrixLeg>,
    pub state: DeployState,
}

/// Complete record of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub trigger: Trigger,
    pub outcome: BuildOutcome,
    pub docs: DocsPublishState,
    pub deploys: Vec<DeployAttempt>,
    /// Deploy failure surfaced to the operator (build-level fatal).
    pub deploy_error: Option<String>,
    pub status: BuildStatus,
    pub notified: bool,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn build_id(&self) -> &str {
        &self.outcome.build_id
    }

    /// Number of deploy attempts that actually wrote to the index.
    pub fn published_count(&self) -> usize {
        self.deploys
            .iter()
            .filter(|d| matches!(d.state, DeployState::Published { .. }))
            .count()
    }

    /// Whether the operator should see a successful exit.
    pub fn succeeded(&self) -> bool {
        self.status.is_success() && self.deploy_error.is_none()
    }

    /// Turn a surfaced deploy failure into an error, keeping the report
    /// otherwise.
    pub fn into_result(self) -> std::result::Result<Self, PipelineError> {
        match &self.deploy_error {
            Some(reason) => Err(PipelineError::DeployRejected(reason.clone())),
            None => Ok(self),
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
