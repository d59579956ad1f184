//! Triggering event and the read-only gate snapshot derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::PipelineError;

/// Kind of event that started the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
    Tag,
}

impl FromStr for EventType {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "push" => Ok(EventType::Push),
            "pull_request" | "pr" => Ok(EventType::PullRequest),
            "tag" => Ok(EventType::Tag),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown event type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Push => "push",
            EventType::PullRequest => "pull_request",
            EventType::Tag => "tag",
        };
        f.write_str(s)
    }
}

/// Trigger input for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub event_type: EventType,
    pub branch: String,
    pub tag: Option<String>,
    /// Only meaningful when an external runner executes a single leg and
    /// tells us whether that leg is the leg of record.
    #[serde(default)]
    pub matrix_position_is_record: bool,
}

impl Trigger {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Push,
            branch: branch.into(),
            tag: None,
            matrix_position_is_record: false,
        }
    }

    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self {
            event_type: EventType::PullRequest,
            ..Self::push(branch)
        }
    }

    pub fn tag(branch: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Tag,
            tag: Some(tag.into()),
            ..Self::push(branch)
        }
    }

    pub fn is_pull_request(&self) -> bool {
        self.event_type == EventType::PullRequest
    }

    /// Tag name when one is present and non-empty.
    pub fn version_tag(&self) -> Option<&str> {
        self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Read-only snapshot used by both post-build gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateContext {
    pub is_leg_of_record: bool,
    pub branch: String,
    pub is_pull_request: bool,
    pub has_tag: bool,
}

impl GateContext {
    pub fn new(trigger: &Trigger, is_leg_of_record: bool) -> Self {
        Self {
            is_leg_of_record,
            branch: trigger.branch.clone(),
            is_pull_request: trigger.is_pull_request(),
            has_tag: trigger.version_tag().is_some(),
        }
    }
}
