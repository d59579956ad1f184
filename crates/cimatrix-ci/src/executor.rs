//! Test executor: `isolated`, then `main` and `doctest`, fail-fast.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cimatrix_core::{obs, Environment, PipelineError, Result, StepConfig, StepResult};

use crate::command::{CommandRunner, CommandSpec, TemplateVars};
use crate::stage::TestPlan;

/// Output lines kept per step in reports.
pub(crate) const OUTPUT_TAIL_LINES: usize = 20;

/// Run one command as a named step.
///
/// Always yields a `StepResult`; a command that could not run is recorded
/// with exit code -1 and the runner error is handed back alongside.
pub(crate) async fn execute_step(
    runner: &dyn CommandRunner,
    name: &str,
    spec: &CommandSpec,
) -> (StepResult, Option<PipelineError>) {
    let start = Instant::now();
    match runner.run(spec).await {
        Ok(output) => (
            StepResult::new(name, output.exit_code, output.duration_ms)
                .with_output_tail(output.tail(OUTPUT_TAIL_LINES)),
            None,
        ),
        Err(e) => (
            StepResult::new(name, -1, start.elapsed().as_millis() as u64)
                .with_output_tail(e.to_string()),
            Some(e),
        ),
    }
}

/// Runs the test plan for one prepared environment.
pub struct TestExecutor {
    runner: Arc<dyn CommandRunner>,
    plan: TestPlan,
    workdir: Option<PathBuf>,
}

impl TestExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, plan: TestPlan) -> Self {
        Self {
            runner,
            plan,
            workdir: None,
        }
    }

    /// Directory the steps run in (the checked-out project).
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    fn command(&self, step: &StepConfig, env: &Environment, vars: &TemplateVars) -> Result<CommandSpec> {
        let mut spec = CommandSpec::from_template(&step.name, &step.command, vars)?
            .envs(&env.env_vars)
            .timeout_secs(step.timeout_secs);
        if let Some(dir) = &self.workdir {
            spec = spec.cwd(dir);
        }
        Ok(spec)
    }

    async fn run_one(&self, step: &StepConfig, env: &Environment, vars: &TemplateVars) -> StepResult {
        let result = match self.command(step, env, vars) {
            Ok(spec) => execute_step(self.runner.as_ref(), &step.name, &spec).await.0,
            Err(e) => StepResult::new(step.name.as_str(), -1, 0).with_output_tail(e.to_string()),
        };
        obs::emit_step_finished(&env.leg, &result);
        result
    }

    /// Run every step, appending results to `steps`.
    ///
    /// The first non-zero exit (in plan order) becomes the error; steps after
    /// it never start. With concurrent follow-ups both follow-ups start
    /// together once `isolated` has passed.
    pub async fn run(
        &self,
        env: &Environment,
        vars: &TemplateVars,
        steps: &mut Vec<StepResult>,
    ) -> Result<()> {
        let isolated = self.run_one(&self.plan.isolated, env, vars).await;
        let failed = !isolated.passed();
        steps.push(isolated);
        if failed {
            return Err(failure(steps));
        }

        if self.plan.concurrent_followups {
            let results = futures::future::join_all(
                self.plan
                    .followups
                    .iter()
                    .map(|step| self.run_one(step, env, vars)),
            )
            .await;
            let failed = results.iter().any(|r| !r.passed());
            steps.extend(results);
            if failed {
                return Err(failure(steps));
            }
        } else {
            for step in &self.plan.followups {
                let result = self.run_one(step, env, vars).await;
                let failed = !result.passed();
                steps.push(result);
                if failed {
                    return Err(failure(steps));
                }
            }
        }
        Ok(())
    }
}

fn failure(steps: &[StepResult]) -> PipelineError {
    match steps.iter().find(|s| !s.passed()) {
        Some(step) => PipelineError::TestFailure {
            step: step.step_name.clone(),
            exit_code: step.exit_code,
        },
        None => PipelineError::TestFailure {
            step: "unknown".to_string(),
            exit_code: -1,
        },
    }
}
