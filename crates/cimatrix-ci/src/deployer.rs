//! Release deployer.
//!
//! On a tagged build: build the distribution once, then `ensure_published`
//! for every attempt. `Published` and `AlreadyExists` are both success, so
//! any number of racing attempts leave exactly one write in the index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cimatrix_core::{
    deploy_conditions, evaluate, obs, BuildFacts, DeployAttempt, DeployConfig, DeployScope,
    DeployState, GateContext, MatrixLeg, PipelineError, Result, VersionTag,
};
use cimatrix_state::{Credentials, PackageArtifact, PackageIndex, SecretStore, UploadOutcome};
use tracing::debug;

use crate::command::{CommandRunner, CommandSpec, TemplateVars};
use crate::executor::OUTPUT_TAIL_LINES;

/// What the deploy stage did for one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRun {
    pub attempts: Vec<DeployAttempt>,
    /// First failure, surfaced to the operator.
    pub error: Option<String>,
}

impl DeployRun {
    fn failed(error: &PipelineError) -> Self {
        Self {
            attempts: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

pub struct ReleaseDeployer {
    runner: Arc<dyn CommandRunner>,
    index: Arc<dyn PackageIndex>,
    secrets: Arc<dyn SecretStore>,
    config: DeployConfig,
    package: String,
    workdir: PathBuf,
}

impl ReleaseDeployer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        index: Arc<dyn PackageIndex>,
        secrets: Arc<dyn SecretStore>,
        config: DeployConfig,
        package: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            index,
            secrets,
            config,
            package: package.into(),
            workdir: workdir.into(),
        }
    }

    /// Build the distribution files for `version` into a clean dist dir.
    pub async fn build_artifact(&self, version: &VersionTag) -> Result<PackageArtifact> {
        self.config.check_dist_dir()?;
        let dist_dir = self.workdir.join(&self.config.dist_dir);
        if tokio::fs::metadata(&dist_dir).await.is_ok() {
            tokio::fs::remove_dir_all(&dist_dir).await?;
        }
        tokio::fs::create_dir_all(&dist_dir).await?;

        let vars = TemplateVars::new()
            .with("interpreter", self.config.interpreter.as_str())
            .with("package", self.package.as_str())
            .with("version", version.to_string())
            .with("dist_dir", path_arg(&dist_dir))
            .with("workdir", path_arg(&self.workdir));
        let spec = CommandSpec::from_template("deploy.build", &self.config.build, &vars)?
            .cwd(&self.workdir)
            .timeout_secs(self.config.timeout_secs);

        let output = self.runner.run(&spec).await.map_err(|e| {
            PipelineError::DeployRejected(format!("package build could not run: {}", e))
        })?;
        if !output.success() {
            return Err(PipelineError::DeployRejected(format!(
                "package build exited with code {}: {}",
                output.exit_code,
                output.tail(OUTPUT_TAIL_LINES)
            )));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dist_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(PipelineError::DeployRejected(format!(
                "package build produced no files in {}",
                dist_dir.display()
            )));
        }
        debug!(files = ?files, "built distribution");

        Ok(PackageArtifact::new(
            self.package.clone(),
            version.to_string(),
            files,
        ))
    }

    /// Make sure `artifact` is in the index. Idempotent.
    pub async fn ensure_published(
        &self,
        artifact: &PackageArtifact,
        credentials: &Credentials,
        leg: Option<&MatrixLeg>,
    ) -> Result<DeployState> {
        let coordinate = artifact.coordinate();
        match self.index.upload(artifact, credentials).await? {
            UploadOutcome::Published => {
                obs::emit_deploy_outcome(&coordinate, leg, "published");
                Ok(DeployState::Published { coordinate })
            }
            UploadOutcome::AlreadyExists => {
                obs::emit_deploy_outcome(&coordinate, leg, "already_exists");
                Ok(DeployState::AlreadyPublished { coordinate })
            }
            UploadOutcome::Rejected(reason) => {
                obs::emit_deploy_rejected(&coordinate, &reason);
                Err(PipelineError::DeployRejected(reason))
            }
        }
    }

    /// Evaluate the deploy gate and, if open, publish.
    ///
    /// `legs` are the legs that each make an attempt under
    /// [`DeployScope::PerLeg`]; all attempts run concurrently.
    pub async fn deploy(
        &self,
        ctx: &GateContext,
        facts: BuildFacts,
        tag: Option<&str>,
        legs: &[MatrixLeg],
    ) -> DeployRun {
        if !self.config.enabled {
            obs::emit_gate_evaluated("deploy", false, &["deploy is disabled".to_string()]);
            return DeployRun::default();
        }
        let verdict = evaluate(&deploy_conditions(self.config.require_success), ctx, facts);
        obs::emit_gate_evaluated("deploy", verdict.open(), &verdict.reasons());
        if !verdict.open() {
            return DeployRun::default();
        }

        let prepared = self.prepare(tag).await;
        let (artifact, credentials) = match prepared {
            Ok(ready) => ready,
            Err(e) => {
                obs::emit_deploy_rejected(&self.package, &e.to_string());
                return DeployRun::failed(&e);
            }
        };

        let attempt_legs: Vec<Option<&MatrixLeg>> = match self.config.scope {
            DeployScope::Once => vec![None],
            DeployScope::PerLeg if legs.is_empty() => vec![None],
            DeployScope::PerLeg => legs.iter().map(Some).collect(),
        };
        let results = futures::future::join_all(
            attempt_legs
                .iter()
                .map(|leg| self.ensure_published(&artifact, &credentials, *leg)),
        )
        .await;

        let mut run = DeployRun::default();
        for (leg, result) in attempt_legs.into_iter().zip(results) {
            let state = match result {
                Ok(state) => state,
                Err(e) => {
                    let reason = e.to_string();
                    if run.error.is_none() {
                        run.error = Some(reason.clone());
                    }
                    DeployState::Rejected { reason }
                }
            };
            run.attempts.push(DeployAttempt {
                leg: leg.cloned(),
                state,
            });
        }
        run
    }

    async fn prepare(&self, tag: Option<&str>) -> Result<(PackageArtifact, Credentials)> {
        let tag = tag.ok_or_else(|| PipelineError::DeployRejected("no version tag".to_string()))?;
        let version = VersionTag::parse(tag)?;
        let credentials = self
            .secrets
            .credentials()
            .await
            .map_err(|e| PipelineError::DeployRejected(e.to_string()))?;
        let artifact = self.build_artifact(&version).await?;
        Ok((artifact, credentials))
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
