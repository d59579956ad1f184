//! Matrix leg identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One combination of matrix parameters.
///
/// Identity is the `(interpreter_version, concurrency_enabled)` pair; a
/// development-branch identifier such as `3.8-dev` is simply a different
/// version string from `3.8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixLeg {
    pub interpreter_version: String,
    pub concurrency_enabled: bool,
}

impl MatrixLeg {
    pub fn new(interpreter_version: impl Into<String>, concurrency_enabled: bool) -> Self {
        Self {
            interpreter_version: interpreter_version.into(),
            concurrency_enabled,
        }
    }

    /// Stable, filesystem-safe label, e.g. `py3.7-concurrency-on`.
    pub fn slug(&self) -> String {
        let version: String = self
            .interpreter_version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        format!(
            "py{}-concurrency-{}",
            version,
            if self.concurrency_enabled { "on" } else { "off" }
        )
    }
}

impl fmt::Display for MatrixLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (concurrency={})",
            self.interpreter_version,
            if self.concurrency_enabled { "on" } else { "off" }
        )
    }
}
