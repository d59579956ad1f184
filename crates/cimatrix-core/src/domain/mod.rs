//! Domain models for cimatrix.
//!
//! Canonical definitions for the core entities:
//! - `MatrixLeg`: one combination of matrix parameters
//! - `Environment` / `PackageSpec`: resolved per-leg execution environment
//! - `StepResult` / `LegReport` / `BuildOutcome`: execution results
//! - `Trigger` / `GateContext`: triggering event and gate snapshot
//! - `BuildReport`: joined outcome plus post-build actions

pub mod environment;
pub mod error;
pub mod leg;
pub mod outcome;
pub mod report;
pub mod trigger;

// Re-export main types and errors
pub use environment::{Environment, PackageSpec};
pub use error::{ErrorKind, PipelineError, Result};
pub use leg::MatrixLeg;
pub use outcome::{BuildOutcome, LegFailure, LegReport, LegStatus, StepResult};
pub use report::{BuildReport, DeployAttempt, DeployState, DocsPublishState};
pub use trigger::{EventType, GateContext, Trigger};
