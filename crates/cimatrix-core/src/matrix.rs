//! Matrix expansion and leg-of-record selection.
//!
//! Legs are enumerated with the concurrency flags as the outer loop and the
//! interpreter versions as the inner loop:
//!
//! ```text
//! versions = [3.6, 3.7], flags = [true, false]
//! -> (3.6, true), (3.7, true), (3.6, false), (3.7, false)
//! ```
//!
//! The order is part of the contract: `RecordPolicy::Position` and the
//! matrix digest both depend on it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{MatrixLeg, PipelineError, Result};

/// Matrix axes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSpec {
    pub versions: Vec<String>,
    pub concurrency: Vec<bool>,
}

impl MatrixSpec {
    pub fn new(versions: Vec<String>, concurrency: Vec<bool>) -> Self {
        Self {
            versions,
            concurrency,
        }
    }

    /// Reject empty axes and repeated values, either of which would break
    /// the "exactly |V|x|F| distinct legs" property.
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "matrix has no interpreter versions".to_string(),
            ));
        }
        if self.concurrency.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "matrix has no concurrency flags".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for version in &self.versions {
            if version.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "matrix contains an empty interpreter version".to_string(),
                ));
            }
            if !seen.insert(version.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "interpreter version '{}' listed twice",
                    version
                )));
            }
        }

        let mut flags = HashSet::new();
        for flag in &self.concurrency {
            if !flags.insert(*flag) {
                return Err(PipelineError::InvalidConfig(format!(
                    "concurrency flag '{}' listed twice",
                    flag
                )));
            }
        }
        Ok(())
    }

    /// Expand the cartesian product in the fixed order described above.
    pub fn expand(&self) -> Result<Vec<MatrixLeg>> {
        self.validate()?;
        let legs = self
            .concurrency
            .iter()
            .flat_map(|flag| {
                self.versions
                    .iter()
                    .map(move |version| MatrixLeg::new(version.clone(), *flag))
            })
            .collect();
        Ok(legs)
    }

    pub fn leg_count(&self) -> usize {
        self.versions.len() * self.concurrency.len()
    }
}

/// How the single leg of record is chosen, computed once per build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordPolicy {
    /// The first leg of the expanded matrix.
    #[default]
    FirstLeg,
    /// A fixed zero-based position in the expanded matrix.
    Position { index: usize },
    /// The leg with this exact identity.
    Matching { version: String, concurrency: bool },
}

impl RecordPolicy {
    /// Resolve the policy to an index into `legs`.
    pub fn select(&self, legs: &[MatrixLeg]) -> Result<usize> {
        if legs.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "cannot pick a leg of record from an empty matrix".to_string(),
            ));
        }
        match self {
            RecordPolicy::FirstLeg => Ok(0),
            RecordPolicy::Position { index } if *index < legs.len() => Ok(*index),
            RecordPolicy::Position { index } => Err(PipelineError::InvalidConfig(format!(
                "record position {} is outside a matrix of {} legs",
                index,
                legs.len()
            ))),
            RecordPolicy::Matching {
                version,
                concurrency,
            } => legs
                .iter()
                .position(|l| &l.interpreter_version == version && l.concurrency_enabled == *concurrency)
                .ok_or_else(|| {
                    PipelineError::InvalidConfig(format!(
                        "record leg {} is not part of the matrix",
                        MatrixLeg::new(version.clone(), *concurrency)
                    ))
                }),
        }
    }
}

/// SHA-256 over the ordered legs; identical inputs always give the same
/// digest, and reordering changes it.
pub fn matrix_digest(legs: &[MatrixLeg]) -> String {
    let mut hasher = Sha256::new();
    for leg in legs {
        hasher.update(leg.interpreter_version.as_bytes());
        hasher.update(b"\0");
        hasher.update(if leg.concurrency_enabled { b"1" } else { b"0" });
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
