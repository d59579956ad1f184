//! cimatrix CI - matrix execution and post-build stages
//!
//! Provides the side-effecting half of the pipeline:
//! - Runs every matrix leg (resolve, install, test) under a parallelism bound
//! - Publishes documentation from the leg of record on trunk
//! - Deploys tagged releases idempotently to the package index
//! - Records build status and sends change notifications

pub mod cancel;
pub mod command;
pub mod deployer;
pub mod executor;
pub mod fakes;
pub mod git_host;
pub mod index;
pub mod installer;
pub mod leg;
pub mod pipeline;
pub mod publisher;
pub mod scheduler;
pub mod stage;

// Re-export key types
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, TemplateVars};
pub use deployer::{DeployRun, ReleaseDeployer};
pub use executor::TestExecutor;
pub use git_host::GitDocHost;
pub use index::{classify_upload, CommandPackageIndex};
pub use installer::DependencyInstaller;
pub use leg::{LegExecutor, LegRunner};
pub use pipeline::{BuildPlan, Pipeline, PipelineServices, PlannedLeg};
pub use publisher::{redirect_page, DocsPublisher};
pub use scheduler::{MatrixRun, MatrixScheduler};
pub use stage::TestPlan;
