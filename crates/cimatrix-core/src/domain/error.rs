//! Pipeline error taxonomy.

use cimatrix_state::StorageError;
use serde::{Deserialize, Serialize};

/// Machine-readable error classification carried into build reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EnvironmentUnavailable,
    DependencyInstallFailed,
    TestFailure,
    PublishFailed,
    DeployRejected,
    InvalidConfig,
    Command,
    Cancelled,
    Storage,
    Io,
}

/// cimatrix pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("interpreter {version} is not available on this runner")]
    EnvironmentUnavailable { version: String },

    #[error("dependency install failed for {leg}: {reason}")]
    DependencyInstallFailed { leg: String, reason: String },

    #[error("test step '{step}' failed with exit code {exit_code}")]
    TestFailure { step: String, exit_code: i32 },

    #[error("documentation publish failed: {0}")]
    PublishFailed(String),

    #[error("deploy rejected: {0}")]
    DeployRejected(String),

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("command `{program}` could not run: {reason}")]
    Command { program: String, reason: String },

    #[error("build cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::EnvironmentUnavailable { .. } => ErrorKind::EnvironmentUnavailable,
            PipelineError::DependencyInstallFailed { .. } => ErrorKind::DependencyInstallFailed,
            PipelineError::TestFailure { .. } => ErrorKind::TestFailure,
            PipelineError::PublishFailed(_) => ErrorKind::PublishFailed,
            PipelineError::DeployRejected(_) => ErrorKind::DeployRejected,
            PipelineError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            PipelineError::Command { .. } => ErrorKind::Command,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Serialization(_) | PipelineError::Io(_) => ErrorKind::Io,
        }
    }

    /// Errors that end a single leg without touching its siblings.
    pub fn is_leg_local(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EnvironmentUnavailable
                | ErrorKind::DependencyInstallFailed
                | ErrorKind::TestFailure
                | ErrorKind::Cancelled
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::EnvironmentUnavailable {
            version: "3.8-dev".to_string(),
        };
        assert!(err.to_string().contains("3.8-dev"));

        let err = PipelineError::TestFailure {
            step: "isolated".to_string(),
            exit_code: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("isolated"));
        assert!(msg.contains('2'));
    }

    #[test]
    fn test_leg_local_classification() {
        assert!(PipelineError::TestFailure {
            step: "main".to_string(),
            exit_code: 1
        }
        .is_leg_local());
        assert!(PipelineError::DependencyInstallFailed {
            leg: "3.7".to_string(),
            reason: "resolution conflict".to_string()
        }
        .is_leg_local());
        assert!(!PipelineError::DeployRejected("403".to_string()).is_leg_local());
        assert!(!PipelineError::PublishFailed("push rejected".to_string()).is_leg_local());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: PipelineError = StorageError::SecretUnavailable("nope".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("secret unavailable"));
    }
}
