//! Build notifications.
//!
//! A [`NotificationPolicy`] decides, from the previous and current build
//! status, whether a [`Notification`] is sent to a [`Notifier`].

use async_trait::async_trait;
use cimatrix_state::BuildStatus;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{BuildReport, DocsPublishState, Result};

/// When to notify for a given outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyWhen {
    /// Only when the outcome differs from the previous build's outcome.
    Change,
    Always,
    Never,
}

/// Notification policy per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicy {
    pub on_success: NotifyWhen,
    pub on_failure: NotifyWhen,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            on_success: NotifyWhen::Change,
            on_failure: NotifyWhen::Always,
        }
    }
}

impl NotificationPolicy {
    /// Cancelled builds never notify; a first build with no history counts
    /// as a change.
    pub fn should_notify(&self, previous: Option<BuildStatus>, current: BuildStatus) -> bool {
        let when = match current {
            BuildStatus::Passed => self.on_success,
            BuildStatus::Failed => self.on_failure,
            BuildStatus::Cancelled => return false,
        };
        match when {
            NotifyWhen::Always => true,
            NotifyWhen::Never => false,
            NotifyWhen::Change => previous != Some(current),
        }
    }

    /// Like [`should_notify`](Self::should_notify), but a failed docs
    /// publish or deploy always counts as a change worth reporting.
    pub fn should_notify_report(&self, previous: Option<BuildStatus>, report: &BuildReport) -> bool {
        let stage_failed = matches!(report.docs, DocsPublishState::Failed { .. })
            || report.deploy_error.is_some();
        if stage_failed && report.status != BuildStatus::Cancelled {
            let when = if report.status.is_success() {
                self.on_success
            } else {
                self.on_failure
            };
            return when != NotifyWhen::Never;
        }
        self.should_notify(previous, report.status)
    }
}

/// Message delivered to a notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub build_id: String,
    pub branch: String,
    pub status: BuildStatus,
    pub previous: Option<BuildStatus>,
    pub failed_legs: Vec<String>,
    pub publish_failure: Option<String>,
    pub deploy_failure: Option<String>,
}

impl Notification {
    pub fn from_report(report: &BuildReport, previous: Option<BuildStatus>) -> Self {
        let publish_failure = match &report.docs {
            DocsPublishState::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        Self {
            build_id: report.build_id().to_string(),
            branch: report.trigger.branch.clone(),
            status: report.status,
            previous,
            failed_legs: report
                .outcome
                .failed_legs()
                .map(|l| l.leg.to_string())
                .collect(),
            publish_failure,
            deploy_failure: report.deploy_error.clone(),
        }
    }

    pub fn summary(&self) -> String {
        let mut line = format!("build {} on {}: {}", self.build_id, self.branch, self.status);
        if let Some(previous) = self.previous {
            if previous != self.status {
                line.push_str(&format!(" (was {})", previous));
            }
        }
        if !self.failed_legs.is_empty() {
            line.push_str(&format!("; failed legs: {}", self.failed_legs.join(", ")));
        }
        if let Some(reason) = &self.publish_failure {
            line.push_str(&format!("; docs publish failed: {}", reason));
        }
        if let Some(reason) = &self.deploy_failure {
            line.push_str(&format!("; deploy failed: {}", reason));
        }
        line
    }
}

/// Notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Channel that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        if notification.status.is_success() {
            info!(event = "build.notification", build_id = %notification.build_id, "{}", notification.summary());
        } else {
            warn!(event = "build.notification", build_id = %notification.build_id, "{}", notification.summary());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = NotificationPolicy::default();
        // success: change
        assert!(policy.should_notify(Some(BuildStatus::Failed), BuildStatus::Passed));
        assert!(!policy.should_notify(Some(BuildStatus::Passed), BuildStatus::Passed));
        assert!(policy.should_notify(None, BuildStatus::Passed));
        // failure: always
        assert!(policy.should_notify(Some(BuildStatus::Failed), BuildStatus::Failed));
    }

    #[test]
    fn test_never_policy() {
        let policy = NotificationPolicy {
            on_success: NotifyWhen::Never,
            on_failure: NotifyWhen::Never,
        };
        assert!(!policy.should_notify(None, BuildStatus::Passed));
        assert!(!policy.should_notify(Some(BuildStatus::Passed), BuildStatus::Failed));
    }

    #[test]
    fn test_change_on_failure() {
        let policy = NotificationPolicy {
            on_success: NotifyWhen::Always,
            on_failure: NotifyWhen::Change,
        };
        assert!(policy.should_notify(Some(BuildStatus::Passed), BuildStatus::Failed));
        assert!(!policy.should_notify(Some(BuildStatus::Failed), BuildStatus::Failed));
    }

    #[test]
    fn test_cancelled_never_notifies() {
        let policy = NotificationPolicy {
            on_success: NotifyWhen::Always,
            on_failure: NotifyWhen::Always,
        };
        assert!(!policy.should_notify(None, BuildStatus::Cancelled));
    }

    #[test]
    fn test_summary_mentions_transition_and_failures() {
        let n = Notification {
            build_id: "b7".to_string(),
            branch: "trunk".to_string(),
            status: BuildStatus::Failed,
            previous: Some(BuildStatus::Passed),
            failed_legs: vec!["3.7 (concurrency=on)".to_string()],
            publish_failure: None,
            deploy_failure: None,
        };
        let s = n.summary();
        assert!(s.contains("was passed"));
        assert!(s.contains("3.7 (concurrency=on)"));
    }
}
