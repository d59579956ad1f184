//! cimatrix core library
//!
//! Domain types and pure decision logic for the matrix pipeline: expansion,
//! environment resolution, dependency pinning, test ordering, post-build
//! gates, release tags, notification policy and configuration. Nothing in
//! this crate runs external commands.

pub mod config;
pub mod domain;
pub mod gate;
pub mod matrix;
pub mod notify;
pub mod obs;
pub mod ordering;
pub mod pinning;
pub mod release;
pub mod resolver;
pub mod telemetry;

pub use config::{
    DeployConfig, DeployScope, DocsConfig, InstallConfig, MatrixConfig, PipelineConfig,
    StepConfig, TestsConfig,
};
pub use domain::{
    BuildOutcome, BuildReport, DeployAttempt, DeployState, DocsPublishState, Environment,
    ErrorKind, EventType, GateContext, LegFailure, LegReport, LegStatus, MatrixLeg, PackageSpec,
    PipelineError, Result, StepResult, Trigger,
};
pub use gate::{
    deploy_conditions, deploy_release, docs_conditions, evaluate, publish_docs, BuildFacts,
    GateCondition, GateVerdict, GateViolation,
};
pub use matrix::{matrix_digest, MatrixSpec, RecordPolicy};
pub use notify::{LogNotifier, Notification, NotificationPolicy, Notifier, NotifyWhen};
pub use ordering::{bucket_shuffle, derive_seed, package_of};
pub use pinning::{resolve_install_set, PinRule, PinningTable, VersionPredicate};
pub use release::VersionTag;
pub use resolver::{EnvironmentResolver, EnvironmentSettings, InterpreterCatalog};
pub use telemetry::init_tracing;

pub use cimatrix_state::{BuildStatus, StatusRecord};
