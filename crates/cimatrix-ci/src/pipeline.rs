//! Build orchestration: matrix, join, post-build stages, notification.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cimatrix_core::{
    matrix_digest, obs, BuildFacts, BuildOutcome, BuildReport, DocsPublishState, GateContext,
    LogNotifier, MatrixLeg, Notification, Notifier, PackageSpec, PipelineConfig, PipelineError,
    Result, Trigger,
};
use cimatrix_state::{
    DocumentationHost, EnvSecretStore, FileStatusStore, PackageIndex, SecretStore, StatusRecord,
    StatusStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::command::{CommandRunner, ProcessRunner};
use crate::deployer::{DeployRun, ReleaseDeployer};
use crate::git_host::GitDocHost;
use crate::index::CommandPackageIndex;
use crate::installer::DependencyInstaller;
use crate::leg::{cancelled_report, LegExecutor, LegRunner};
use crate::publisher::DocsPublisher;
use crate::scheduler::MatrixScheduler;

/// File under the state dir holding previous build statuses.
pub const STATUS_FILE: &str = "status.json";

/// External collaborators of a pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    pub runner: Arc<dyn CommandRunner>,
    pub index: Arc<dyn PackageIndex>,
    pub docs_host: Arc<dyn DocumentationHost>,
    pub secrets: Arc<dyn SecretStore>,
    pub status: Arc<dyn StatusStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl PipelineServices {
    /// Real processes, git, the upload command, env secrets, on-disk status.
    pub fn local(config: &PipelineConfig, workdir: &Path) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let state_dir = if config.state_dir.is_absolute() {
            config.state_dir.clone()
        } else {
            workdir.join(&config.state_dir)
        };
        Self {
            index: Arc::new(CommandPackageIndex::from_config(
                runner.clone(),
                &config.deploy,
                workdir,
            )),
            docs_host: Arc::new(GitDocHost::new(
                runner.clone(),
                config.docs.remote.clone(),
                workdir,
            )),
            secrets: Arc::new(EnvSecretStore::new(
                config.deploy.username_env.clone(),
                config.deploy.password_env.clone(),
            )),
            status: Arc::new(FileStatusStore::new(state_dir.join(STATUS_FILE))),
            notifier: Arc::new(LogNotifier),
            runner,
        }
    }
}

/// One leg as it would run, without running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLeg {
    pub index: usize,
    pub leg: MatrixLeg,
    pub is_record: bool,
    pub install: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub matrix_digest: String,
    pub record_index: usize,
    pub legs: Vec<PlannedLeg>,
}

pub struct Pipeline {
    config: PipelineConfig,
    services: PipelineServices,
    workdir: PathBuf,
    publisher: DocsPublisher,
    deployer: ReleaseDeployer,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        services: PipelineServices,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        let workdir = workdir.into();
        let publisher = DocsPublisher::new(
            services.runner.clone(),
            services.docs_host.clone(),
            config.docs.clone(),
            config.package.clone(),
            workdir.clone(),
        );
        let deployer = ReleaseDeployer::new(
            services.runner.clone(),
            services.index.clone(),
            services.secrets.clone(),
            config.deploy.clone(),
            config.package.clone(),
            workdir.clone(),
        );
        Ok(Self {
            config,
            services,
            workdir,
            publisher,
            deployer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Expanded matrix, leg of record and install sets.
    pub fn plan(&self) -> Result<BuildPlan> {
        let legs = self.config.legs()?;
        let record_index = self.config.matrix.record.select(&legs)?;
        let installer =
            DependencyInstaller::from_config(self.services.runner.clone(), &self.config.install);
        let planned = legs
            .iter()
            .enumerate()
            .map(|(index, leg)| {
                let install = installer
                    .plan(&leg.interpreter_version)?
                    .iter()
                    .map(PackageSpec::requirement)
                    .collect();
                Ok(PlannedLeg {
                    index,
                    leg: leg.clone(),
                    is_record: index == record_index,
                    install,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BuildPlan {
            matrix_digest: matrix_digest(&legs),
            record_index,
            legs: planned,
        })
    }

    fn leg_runner(&self, build_id: &str) -> LegRunner {
        LegRunner::new(
            &self.config,
            self.services.runner.clone(),
            build_id,
            &self.workdir,
        )
    }

    /// Run the full matrix, then the post-build stages.
    ///
    /// Leg failures and documentation failures end up in the report. A
    /// deploy failure is carried in `BuildReport::deploy_error`;
    /// [`BuildReport::into_result`] turns it into `DeployRejected`.
    pub async fn run(&self, trigger: &Trigger, cancel: CancelToken) -> Result<BuildReport> {
        let build_id = Uuid::new_v4().to_string();
        let span = obs::build_span(&build_id);
        self.run_matrix(trigger, cancel, build_id).instrument(span).await
    }

    async fn run_matrix(
        &self,
        trigger: &Trigger,
        cancel: CancelToken,
        build_id: String,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let legs = self.config.legs()?;
        let record_index = self.config.matrix.record.select(&legs)?;
        let digest = matrix_digest(&legs);
        obs::emit_build_started(&build_id, &digest, legs.len(), record_index);

        let executor: Arc<dyn LegExecutor> = Arc::new(self.leg_runner(&build_id));
        let run = MatrixScheduler::new(self.config.matrix.max_parallel)
            .run(&legs, executor, cancel)
            .await;

        let outcome = BuildOutcome {
            build_id,
            matrix_digest: digest,
            legs: run.legs,
            leg_index_of_record: record_index,
            cancelled: run.cancelled,
        };
        // The post-build stages act on behalf of the leg of record.
        Ok(self.finish(trigger, outcome, true, &legs, true, start).await)
    }

    /// Run a single leg (an external CI provider fans out the matrix), then
    /// the post-build stages gated by `trigger.matrix_position_is_record`.
    pub async fn run_leg(
        &self,
        trigger: &Trigger,
        leg: MatrixLeg,
        cancel: CancelToken,
    ) -> Result<BuildReport> {
        let build_id = Uuid::new_v4().to_string();
        let span = obs::build_span(&build_id);
        self.run_single(trigger, leg, cancel, build_id)
            .instrument(span)
            .await
    }

    async fn run_single(
        &self,
        trigger: &Trigger,
        leg: MatrixLeg,
        cancel: CancelToken,
        build_id: String,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let legs = self.config.legs()?;
        let index = legs.iter().position(|l| *l == leg).ok_or_else(|| {
            PipelineError::InvalidConfig(format!("leg {} is not part of the matrix", leg))
        })?;
        let record_index = self.config.matrix.record.select(&legs)?;
        let digest = matrix_digest(&legs);
        obs::emit_build_started(&build_id, &digest, 1, record_index);

        let runner = self.leg_runner(&build_id);
        let report = tokio::select! {
            report = runner.run_leg(index, leg.clone()) => report,
            _ = cancel.cancelled() => {
                cancelled_report(index, leg.clone(), start.elapsed().as_millis() as u64)
            }
        };

        let outcome = BuildOutcome {
            build_id,
            matrix_digest: digest,
            legs: vec![report],
            leg_index_of_record: record_index,
            cancelled: cancel.is_cancelled(),
        };
        let is_record = trigger.matrix_position_is_record;
        Ok(self
            .finish(trigger, outcome, is_record, std::slice::from_ref(&leg), is_record, start)
            .await)
    }

    async fn finish(
        &self,
        trigger: &Trigger,
        outcome: BuildOutcome,
        is_leg_of_record: bool,
        deploy_legs: &[MatrixLeg],
        track_status: bool,
        start: Instant,
    ) -> BuildReport {
        let (docs, deploy) = if outcome.cancelled {
            obs::emit_build_cancelled(&outcome.build_id);
            (DocsPublishState::NotEvaluated, DeployRun::default())
        } else {
            let ctx = GateContext::new(trigger, is_leg_of_record);
            let facts = BuildFacts {
                success: outcome.success(),
                cancelled: false,
            };
            tokio::join!(
                self.publisher
                    .publish(&ctx, facts, &self.config.trunk_branch),
                self.deployer
                    .deploy(&ctx, facts, trigger.version_tag(), deploy_legs),
            )
        };

        let status = outcome.status();
        let mut report = BuildReport {
            trigger: trigger.clone(),
            outcome,
            docs,
            deploys: deploy.attempts,
            deploy_error: deploy.error,
            status,
            notified: false,
            duration_ms: 0,
        };

        if track_status && !report.outcome.cancelled {
            report.notified = self.notify(&report).await;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_build_finished(
            report.build_id(),
            report.duration_ms,
            report.outcome.passed_count(),
            report.outcome.failed_count(),
            report.succeeded(),
        );
        report
    }

    /// Decide on, send, and record; every failure here is logged and
    /// swallowed.
    async fn notify(&self, report: &BuildReport) -> bool {
        let branch = report.trigger.branch.as_str();
        let previous = match self.services.status.previous(branch).await {
            Ok(record) => record.map(|r| r.status),
            Err(e) => {
                obs::emit_best_effort_error("status.previous", &e);
                None
            }
        };

        let send = self
            .config
            .notifications
            .should_notify_report(previous, report);
        obs::emit_notification(report.build_id(), send);

        let mut sent = false;
        if send {
            let notification = Notification::from_report(report, previous);
            match self.services.notifier.notify(&notification).await {
                Ok(()) => sent = true,
                Err(e) => obs::emit_best_effort_error("notify", &e),
            }
        }

        let record = StatusRecord::now(branch, report.status, report.build_id());
        if let Err(e) = self.services.status.record(record).await {
            obs::emit_best_effort_error("status.record", &e);
        }
        info!(branch = %branch, status = %report.status, "build status recorded");
        sent
    }
}
