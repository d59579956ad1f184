//! Pipeline configuration (`cimatrix.toml`).
//!
//! Every field has a default; an empty file describes the canonical
//! pipeline for the `easypy` package.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{MatrixLeg, PackageSpec, PipelineError, Result};
use crate::matrix::{MatrixSpec, RecordPolicy};
use crate::notify::NotificationPolicy;
use crate::pinning::{PinRule, PinningTable, VersionPredicate};
use crate::resolver::{EnvironmentSettings, InterpreterCatalog};

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Distribution name published to the package index.
    pub package: String,
    pub trunk_branch: String,
    /// Directory for persisted state (previous build status).
    pub state_dir: PathBuf,
    pub matrix: MatrixConfig,
    pub environment: EnvironmentSettings,
    pub interpreters: InterpreterCatalog,
    pub install: InstallConfig,
    pub tests: TestsConfig,
    pub docs: DocsConfig,
    pub deploy: DeployConfig,
    pub notifications: NotificationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            package: "easypy".to_string(),
            trunk_branch: "master".to_string(),
            state_dir: PathBuf::from(".cimatrix"),
            matrix: MatrixConfig::default(),
            environment: EnvironmentSettings::default(),
            interpreters: InterpreterCatalog::default(),
            install: InstallConfig::default(),
            tests: TestsConfig::default(),
            docs: DocsConfig::default(),
            deploy: DeployConfig::default(),
            notifications: NotificationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub versions: Vec<String>,
    pub concurrency: Vec<bool>,
    pub record: RecordPolicy,
    /// Maximum legs running at once.
    pub max_parallel: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            versions: args(&["3.4", "3.5", "3.6", "3.7", "3.8-dev"]),
            concurrency: vec![true, false],
            record: RecordPolicy::FirstLeg,
            max_parallel: 4,
        }
    }
}

impl MatrixConfig {
    pub fn spec(&self) -> MatrixSpec {
        MatrixSpec::new(self.versions.clone(), self.concurrency.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Install command prefix; requirements are appended.
    pub command: Vec<String>,
    pub base_packages: Vec<PackageSpec>,
    pub pins: PinningTable,
    pub timeout_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            command: args(&["{interpreter}", "-m", "pip", "install"]),
            base_packages: vec![
                PackageSpec::latest("pytest"),
                PackageSpec::latest("pytest-random-order"),
                PackageSpec::latest("pyyaml"),
            ],
            pins: PinningTable::new(vec![PinRule::new(
                VersionPredicate::Equals("3.4".to_string()),
                PackageSpec::pinned("gevent", "<1.5"),
            )])
            .with_rule(PinRule::new(
                VersionPredicate::Any,
                PackageSpec::latest("gevent"),
            )),
            timeout_secs: 900,
        }
    }
}

/// One executable step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
}

fn default_step_timeout() -> u64 {
    1800
}

impl StepConfig {
    pub fn new(name: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: args(command),
            timeout_secs: default_step_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsConfig {
    /// Runs alone, before anything else loads into the interpreter.
    pub isolated: StepConfig,
    pub main: StepConfig,
    pub doctest: StepConfig,
    /// Run `main` and `doctest` concurrently after `isolated`.
    pub concurrent_followups: bool,
    /// Fixed shuffle seed; derived from the build id when unset.
    pub seed: Option<u64>,
    /// Explicit test ids. When set, `{tests}` in a step command expands to
    /// them in seeded package-bucket order.
    pub test_ids: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            isolated: StepConfig::new(
                "isolated",
                &["{interpreter}", "-m", "pytest", "-vv", "tests/test_module_isolation.py"],
            ),
            main: StepConfig::new(
                "main",
                &[
                    "{interpreter}",
                    "-m",
                    "pytest",
                    "-vv",
                    "tests",
                    "--random-order-bucket=package",
                    "--random-order-seed={seed}",
                ],
            ),
            doctest: StepConfig::new(
                "doctest",
                &["{interpreter}", "-m", "pytest", "-vv", "--doctest-modules", "easypy"],
            ),
            concurrent_followups: false,
            seed: None,
            test_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    pub enabled: bool,
    /// Interpreter for the doc tools (the leg of record's own is not reused).
    pub interpreter: String,
    pub apidoc: Vec<String>,
    pub render: Vec<String>,
    /// Page the injected `index.html` redirects to.
    pub redirect_target: String,
    pub hosting_branch: String,
    /// Git remote name or URL receiving the force-push.
    pub remote: String,
    pub timeout_secs: u64,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: "python3".to_string(),
            apidoc: args(&["sphinx-apidoc", "-F", "-o", "{api_dir}", "easypy"]),
            render: args(&["sphinx-build", "-b", "html", "{api_dir}", "{site_dir}"]),
            redirect_target: "easypy.html".to_string(),
            hosting_branch: "gh-pages".to_string(),
            remote: "origin".to_string(),
            timeout_secs: 600,
        }
    }
}

/// How many upload attempts a tagged build makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployScope {
    /// One attempt per matrix leg, all racing the same version.
    PerLeg,
    /// A single attempt per build.
    Once,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub enabled: bool,
    pub interpreter: String,
    pub build: Vec<String>,
    /// Output directory of `build`, relative to the working directory.
    pub dist_dir: PathBuf,
    /// Upload command; `{files}` expands to every built file.
    pub upload: Vec<String>,
    /// Variables the secret store reads credentials from.
    pub username_env: String,
    pub password_env: String,
    /// Variables the upload command receives credentials in.
    pub upload_username_var: String,
    pub upload_password_var: String,
    pub scope: DeployScope,
    /// Also require every leg to pass (off: the tag alone gates deploy).
    pub require_success: bool,
    pub timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: "python3".to_string(),
            build: args(&[
                "{interpreter}",
                "setup.py",
                "sdist",
                "bdist_wheel",
                "--dist-dir",
                "{dist_dir}",
            ]),
            dist_dir: PathBuf::from("dist"),
            upload: args(&[
                "{interpreter}",
                "-m",
                "twine",
                "upload",
                "--non-interactive",
                "{files}",
            ]),
            username_env: "CIMATRIX_INDEX_USERNAME".to_string(),
            password_env: "CIMATRIX_INDEX_PASSWORD".to_string(),
            upload_username_var: "TWINE_USERNAME".to_string(),
            upload_password_var: "TWINE_PASSWORD".to_string(),
            scope: DeployScope::PerLeg,
            require_success: false,
            timeout_secs: 600,
        }
    }
}

impl DeployConfig {
    /// `dist_dir` is wiped before every package build, so it must name a
    /// subdirectory strictly inside the working directory.
    pub fn check_dist_dir(&self) -> Result<()> {
        let dir = &self.dist_dir;
        let inside = dir
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
            && dir.components().any(|c| matches!(c, Component::Normal(_)));
        if inside {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "deploy.dist_dir '{}' must be a relative subdirectory of the working directory",
                dir.display()
            )))
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, validating the result.
    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&input).map_err(|e| match e {
            PipelineError::InvalidConfig(msg) => {
                PipelineError::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Expanded legs in their fixed order.
    pub fn legs(&self) -> Result<Vec<MatrixLeg>> {
        self.matrix.spec().expand()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if self.package.trim().is_empty() {
            return invalid("package name is empty".to_string());
        }
        if self.trunk_branch.trim().is_empty() {
            return invalid("trunk_branch is empty".to_string());
        }
        if self.matrix.max_parallel == 0 {
            return invalid("matrix.max_parallel must be at least 1".to_string());
        }

        let legs = self.legs()?;
        self.matrix.record.select(&legs)?;
        self.install.pins.validate()?;

        let mut commands: Vec<(&str, &Vec<String>)> = vec![("install.command", &self.install.command)];
        let mut names = HashSet::new();
        for step in [&self.tests.isolated, &self.tests.main, &self.tests.doctest] {
            if !names.insert(step.name.as_str()) {
                return invalid(format!("test step name '{}' used twice", step.name));
            }
            commands.push((step.name.as_str(), &step.command));
        }
        if self.docs.enabled {
            commands.push(("docs.apidoc", &self.docs.apidoc));
            commands.push(("docs.render", &self.docs.render));
            if self.docs.hosting_branch.trim().is_empty() {
                return invalid("docs.hosting_branch is empty".to_string());
            }
        }
        if self.deploy.enabled {
            self.deploy.check_dist_dir()?;
            commands.push(("deploy.build", &self.deploy.build));
            commands.push(("deploy.upload", &self.deploy.upload));
        }
        for (name, command) in commands {
            if command.first().map_or(true, |p| p.trim().is_empty()) {
                return invalid(format!("{} has an empty command", name));
            }
        }
        Ok(())
    }

    /// Base variables for template rendering shared by every command.
    pub fn template_defaults(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("package".to_string(), self.package.clone());
        vars.insert(
            "dist_dir".to_string(),
            self.deploy.dist_dir.display().to_string(),
        );
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.legs().unwrap().len(), 10);
    }

    #[test]
    fn test_empty_document_equals_default() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let text = PipelineConfig::default().to_toml_string().unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, PipelineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_toml_str(
            r#"
            trunk_branch = "trunk"

            [matrix]
            versions = ["3.6", "3.7"]
            record = { type = "position", index = 3 }

            [notifications]
            on_failure = "change"
            "#,
        )
        .unwrap();
        assert_eq!(config.trunk_branch, "trunk");
        assert_eq!(config.legs().unwrap().len(), 4);
        assert_eq!(config.matrix.record, RecordPolicy::Position { index: 3 });
        assert_eq!(config.matrix.max_parallel, 4);
        assert_eq!(config.notifications.on_failure, crate::notify::NotifyWhen::Change);
    }

    #[test]
    fn test_record_out_of_range_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [matrix]
            versions = ["3.6"]
            concurrency = [true]
            record = { type = "position", index = 1 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        assert!(PipelineConfig::from_toml_str(
            r#"
            [matrix]
            versions = ["3.6", "3.6"]
            "#,
        )
        .is_err());
    }

    #[test]
    fn test_empty_step_command_rejected() {
        let mut config = PipelineConfig::default();
        config.tests.doctest.command.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("doctest"));
    }

    #[test]
    fn test_dist_dir_outside_workdir_rejected() {
        for dir in ["", ".", "./", "..", "../dist", "dist/../..", "/tmp", "/"] {
            let mut config = PipelineConfig::default();
            config.deploy.dist_dir = PathBuf::from(dir);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("dist_dir"), "accepted {:?}", dir);
        }
    }

    #[test]
    fn test_nested_dist_dir_accepted() {
        for dir in ["dist", "./dist", "build/dist"] {
            let mut config = PipelineConfig::default();
            config.deploy.dist_dir = PathBuf::from(dir);
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cimatrix.toml");
        std::fs::write(&path, "[matrix]\nmax_parallel = 0\n").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cimatrix.toml"));
        assert!(msg.contains("max_parallel"));
    }

    #[test]
    fn test_legacy_pin_default() {
        let config = PipelineConfig::default();
        let legacy = config.install.pins.select("3.4").unwrap();
        assert_eq!(legacy[0].requirement(), "gevent<1.5");
        let modern = config.install.pins.select("3.7").unwrap();
        assert_eq!(modern[0].requirement(), "gevent");
    }
}
