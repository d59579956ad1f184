//! One matrix leg: resolve, install, test.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cimatrix_core::{
    bucket_shuffle, derive_seed, obs, EnvironmentResolver, LegReport, MatrixLeg, PipelineConfig, PipelineError,
    Result, StepResult,
};

use crate::command::{CommandRunner, TemplateVars};
use crate::executor::TestExecutor;
use crate::installer::DependencyInstaller;
use crate::stage::TestPlan;

/// Runs a single leg to completion. Leg-local failures end up in the
/// returned report; they never escape as errors.
#[async_trait]
pub trait LegExecutor: Send + Sync {
    async fn run_leg(&self, index: usize, leg: MatrixLeg) -> LegReport;
}

/// Production leg executor.
pub struct LegRunner {
    resolver: EnvironmentResolver,
    installer: DependencyInstaller,
    executor: TestExecutor,
    base_vars: BTreeMap<String, String>,
    seed: u64,
    ordered_tests: Vec<String>,
}

impl LegRunner {
    pub fn new(
        config: &PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        build_id: &str,
        workdir: &Path,
    ) -> Self {
        let mut base_vars = config.template_defaults();
        base_vars.insert("workdir".to_string(), workdir.display().to_string());
        let seed = config.tests.seed.unwrap_or_else(|| derive_seed(build_id));
        Self {
            resolver: EnvironmentResolver::new(
                config.interpreters.clone(),
                config.environment.clone(),
            ),
            installer: DependencyInstaller::from_config(runner.clone(), &config.install)
                .with_workdir(workdir),
            executor: TestExecutor::new(runner, TestPlan::from_config(&config.tests))
                .with_workdir(workdir),
            base_vars,
            seed,
            ordered_tests: bucket_shuffle(&config.tests.test_ids, seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    async fn execute(&self, leg: &MatrixLeg, steps: &mut Vec<StepResult>) -> Result<()> {
        let mut env = self.resolver.resolve(leg)?;

        let mut vars = TemplateVars::from_map(self.base_vars.clone());
        vars.set("interpreter", path_arg(&env.interpreter));
        vars.set("version", leg.interpreter_version.as_str());
        vars.set("seed", self.seed.to_string());
        vars.set_tests(self.ordered_tests.clone());
        obs::emit_shuffle_seed(leg, self.seed);

        self.installer.install(&mut env, &vars, steps).await?;
        self.executor.run(&env, &vars, steps).await
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl LegExecutor for LegRunner {
    async fn run_leg(&self, index: usize, leg: MatrixLeg) -> LegReport {
        let start = Instant::now();
        obs::emit_leg_started(index, &leg);

        let mut steps = Vec::new();
        let outcome = self.execute(&leg, &mut steps).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let report = match outcome {
            Ok(()) => LegReport::passed(index, leg, steps, duration_ms),
            Err(e) => LegReport::failed(index, leg, steps, &e, duration_ms),
        };
        obs::emit_leg_finished(&report);
        report
    }
}

/// Report for a leg that never got to run.
pub(crate) fn cancelled_report(index: usize, leg: MatrixLeg, duration_ms: u64) -> LegReport {
    LegReport::failed(index, leg, Vec::new(), &PipelineError::Cancelled, duration_ms)
}
