//! Dependency installer: base packages plus version-conditional pins.

use std::path::PathBuf;
use std::sync::Arc;

use cimatrix_core::{
    obs, resolve_install_set, Environment, InstallConfig, PackageSpec, PinningTable,
    PipelineError, Result, StepResult,
};
use tracing::debug;

use crate::command::{CommandRunner, CommandSpec, TemplateVars};
use crate::executor::execute_step;
use crate::stage::INSTALL_STEP;

pub struct DependencyInstaller {
    runner: Arc<dyn CommandRunner>,
    command: Vec<String>,
    base: Vec<PackageSpec>,
    pins: PinningTable,
    timeout_secs: u64,
    workdir: Option<PathBuf>,
}

impl DependencyInstaller {
    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &InstallConfig) -> Self {
        Self {
            runner,
            command: config.command.clone(),
            base: config.base_packages.clone(),
            pins: config.pins.clone(),
            timeout_secs: config.timeout_secs,
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Packages a leg on `version` installs, in install order.
    pub fn plan(&self, version: &str) -> Result<Vec<PackageSpec>> {
        resolve_install_set(&self.base, &self.pins, version)
    }

    /// Install the planned set into `env` with a single command.
    ///
    /// The step result is appended to `steps` whatever happens. On success
    /// every package is recorded in `env.installed_packages`.
    pub async fn install(
        &self,
        env: &mut Environment,
        vars: &TemplateVars,
        steps: &mut Vec<StepResult>,
    ) -> Result<()> {
        let leg = env.leg.to_string();
        let fail = |reason: String| PipelineError::DependencyInstallFailed {
            leg: leg.clone(),
            reason,
        };

        let packages = self.plan(&env.leg.interpreter_version)?;
        let mut spec = CommandSpec::from_template(INSTALL_STEP, &self.command, vars)?
            .args(packages.iter().map(PackageSpec::requirement))
            .envs(&env.env_vars)
            .timeout_secs(self.timeout_secs);
        if let Some(dir) = &self.workdir {
            spec = spec.cwd(dir);
        }
        debug!(leg = %env.leg, packages = ?spec.args, "installing dependencies");

        let (result, error) = execute_step(self.runner.as_ref(), INSTALL_STEP, &spec).await;
        obs::emit_step_finished(&env.leg, &result);
        let exit_code = result.exit_code;
        let tail = result.output_tail.clone();
        steps.push(result);

        if let Some(e) = error {
            return Err(fail(e.to_string()));
        }
        if exit_code != 0 {
            return Err(fail(format!("installer exited with code {}: {}", exit_code, tail)));
        }

        for package in packages {
            env.record_installed(package);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Reply, ScriptedRunner};
    use cimatrix_core::MatrixLeg;
    use std::collections::BTreeMap;

    fn env(version: &str) -> Environment {
        Environment::new(
            MatrixLeg::new(version, true),
            PathBuf::from(format!("/usr/bin/python{}", version)),
            BTreeMap::new(),
        )
    }

    fn vars(version: &str) -> TemplateVars {
        TemplateVars::new().with("interpreter", format!("/usr/bin/python{}", version))
    }

    #[tokio::test]
    async fn test_legacy_leg_installs_pinned_backend() {
        let runner = Arc::new(ScriptedRunner::new());
        let installer = DependencyInstaller::from_config(runner.clone(), &InstallConfig::default());
        let mut env = env("3.4");
        let mut steps = Vec::new();
        installer.install(&mut env, &vars("3.4"), &mut steps).await.unwrap();

        let lines = runner.command_lines();
        let line = &lines[0];
        assert!(line.starts_with("/usr/bin/python3.4 -m pip install"));
        assert!(line.contains("gevent<1.5"));
        assert_eq!(
            env.installed("gevent").and_then(|p| p.version_constraint.as_deref()),
            Some("<1.5")
        );
        assert_eq!(steps[0].step_name, "install");
    }

    #[tokio::test]
    async fn test_modern_leg_installs_latest_backend() {
        let runner = Arc::new(ScriptedRunner::new());
        let installer = DependencyInstaller::from_config(runner.clone(), &InstallConfig::default());
        let mut env = env("3.7");
        installer.install(&mut env, &vars("3.7"), &mut Vec::new()).await.unwrap();

        let lines = runner.command_lines();
        let line = &lines[0];
        assert!(line.ends_with(" gevent"));
        assert!(!env.installed("gevent").unwrap().is_pinned());
        assert!(env.installed("pytest-random-order").is_some());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_leg() {
        let runner = Arc::new(ScriptedRunner::new().on("pip install", Reply::exit(1).stderr("No matching distribution")));
        let installer = DependencyInstaller::from_config(runner, &InstallConfig::default());
        let mut env = env("3.6");
        let mut steps = Vec::new();
        let err = installer.install(&mut env, &vars("3.6"), &mut steps).await.unwrap_err();

        assert!(matches!(err, PipelineError::DependencyInstallFailed { ref reason, .. } if reason.contains("No matching distribution")));
        assert!(env.installed_packages.is_empty());
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_fails_leg() {
        let runner = Arc::new(ScriptedRunner::new().otherwise(Reply::spawn_failure("interpreter vanished")));
        let installer = DependencyInstaller::from_config(runner, &InstallConfig::default());
        let err = installer
            .install(&mut env("3.6"), &vars("3.6"), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("interpreter vanished"));
    }
}
