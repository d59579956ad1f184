//! External command execution.
//!
//! Every tool the pipeline drives (interpreter, installer, test runner, doc
//! generator, packager, uploader, git) goes through [`CommandRunner`], so the
//! orchestration can be exercised against a scripted runner in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cimatrix_core::{PipelineError, Result};
use tokio::process::Command;
use tracing::debug;

/// Placeholder that expands to one argument per file.
pub const FILES_PLACEHOLDER: &str = "{files}";
/// Placeholder that expands to one argument per test id, in run order.
pub const TESTS_PLACEHOLDER: &str = "{tests}";

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Values substituted into command templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
    files: Vec<String>,
    tests: Vec<String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_tests(&mut self, tests: Vec<String>) {
        self.tests = tests;
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn render_arg(&self, arg: &str) -> Result<String> {
        let mut out = String::with_capacity(arg.len());
        let mut rest = arg;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = match after.find('}') {
                Some(close) => close,
                None => {
                    out.push_str(&rest[open..]);
                    return Ok(out);
                }
            };
            let name = &after[..close];
            let is_placeholder =
                !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_');
            if !is_placeholder {
                // literal brace, e.g. a shell snippet
                out.push('{');
                rest = after;
                continue;
            }
            match self.values.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "unknown placeholder {{{}}} in argument '{}'",
                        name, arg
                    )))
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Render a template into program arguments.
    pub fn render(&self, template: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(template.len() + self.files.len() + self.tests.len());
        for arg in template {
            if arg == FILES_PLACEHOLDER {
                out.extend(self.files.iter().cloned());
            } else if arg == TESTS_PLACEHOLDER {
                out.extend(self.tests.iter().cloned());
            } else {
                out.push(self.render_arg(arg)?);
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

/// A fully rendered command invocation.
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Variables whose values never appear in `Debug` output or logs.
    secret_env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// 0 disables the timeout.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Render `template` with `vars`; the first element is the program.
    pub fn from_template(label: &str, template: &[String], vars: &TemplateVars) -> Result<Self> {
        let mut rendered = vars.render(template)?.into_iter();
        let program = rendered
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| PipelineError::InvalidConfig(format!("{} has an empty command", label)))?;
        Ok(Self {
            program,
            args: rendered.collect(),
            ..Self::default()
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secret_env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Names of the secret variables (values are not exposed).
    pub fn secret_keys(&self) -> impl Iterator<Item = &str> {
        self.secret_env.keys().map(String::as_str)
    }

    /// `program arg1 arg2 ...`, for logs and matching.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secrets: BTreeMap<&str, &str> = self.secret_keys().map(|k| (k, "<redacted>")).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("secret_env", &secrets)
            .field("cwd", &self.cwd)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `lines` lines of stdout followed by stderr.
    pub fn tail(&self, lines: usize) -> String {
        let combined: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = combined.len().saturating_sub(lines);
        combined[start..].join("\n")
    }

    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.stdout.to_lowercase().contains(&needle) || self.stderr.to_lowercase().contains(&needle)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes commands. A non-zero exit is an `Ok` output; `Err` means the
/// command could not be run at all (spawn failure, timeout).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as child processes.
///
/// Children are killed when their future is dropped, so cancelling a leg
/// also stops its running step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(program = %spec.program, args = ?spec.args, "spawning command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .envs(&spec.secret_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| PipelineError::Command {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        let waited = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| PipelineError::Command {
                program: spec.program.clone(),
                reason: format!("timed out after {} seconds", spec.timeout_secs),
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|e| PipelineError::Command {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let vars = TemplateVars::new()
            .with("interpreter", "/usr/bin/python3.7")
            .with("seed", "42");
        let args = vars
            .render(&template(&["{interpreter}", "-m", "pytest", "--random-order-seed={seed}"]))
            .unwrap();
        assert_eq!(args, vec!["/usr/bin/python3.7", "-m", "pytest", "--random-order-seed=42"]);
    }

    #[test]
    fn test_render_expands_files() {
        let vars = TemplateVars::new().with_files(["dist/a.tar.gz", "dist/a.whl"]);
        let args = vars.render(&template(&["twine", "upload", "{files}"])).unwrap();
        assert_eq!(args, vec!["twine", "upload", "dist/a.tar.gz", "dist/a.whl"]);
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let err = TemplateVars::new().render(&template(&["{nope}"])).unwrap_err();
        assert!(err.to_string().contains("{nope}"));
    }

    #[test]
    fn test_render_keeps_literal_braces() {
        let vars = TemplateVars::new();
        let args = vars.render(&template(&["-c", "print({1: 2})", "{"])).unwrap();
        assert_eq!(args, vec!["-c", "print({1: 2})", "{"]);
    }

    #[test]
    fn test_from_template_rejects_empty_program() {
        let err = CommandSpec::from_template("docs.apidoc", &template(&["{x}"]), &TemplateVars::new().with("x", ""))
            .unwrap_err();
        assert!(err.to_string().contains("docs.apidoc"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let spec = CommandSpec::new("twine").secret_env("TWINE_PASSWORD", "hunter2");
        let rendered = format!("{:?}", spec);
        assert!(rendered.contains("TWINE_PASSWORD"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_output_tail() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "a\nb\nc\n".to_string(),
            stderr: "boom\n".to_string(),
            duration_ms: 1,
        };
        assert_eq!(out.tail(2), "c\nboom");
    }

    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let spec = CommandSpec::new("echo").arg("hello");
        let out = ProcessRunner.run(&spec).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_process_runner_non_zero_exit_is_ok() {
        let out = ProcessRunner.run(&CommandSpec::new("false")).await.unwrap();
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_process_runner_passes_env_and_secrets() {
        let mut env = BTreeMap::new();
        env.insert("CIMATRIX_VISIBLE".to_string(), "yes".to_string());
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo $CIMATRIX_VISIBLE $CIMATRIX_HIDDEN"])
            .envs(&env)
            .secret_env("CIMATRIX_HIDDEN", "s3cret");
        let out = ProcessRunner.run(&spec).await.unwrap();
        assert_eq!(out.stdout.trim(), "yes s3cret");
    }

    #[tokio::test]
    async fn test_process_runner_spawn_failure() {
        let err = ProcessRunner
            .run(&CommandSpec::new("cimatrix-definitely-not-a-program"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Command { .. }));
    }

    #[tokio::test]
    async fn test_process_runner_timeout() {
        let spec = CommandSpec::new("sleep").arg("5").timeout_secs(1);
        let err = ProcessRunner.run(&spec).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
