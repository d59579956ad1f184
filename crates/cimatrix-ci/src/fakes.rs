//! Scripted command runner for tests.
//!
//! Rules match on a substring of the rendered command line; the first
//! matching rule answers, otherwise the default reply (exit 0) does.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cimatrix_core::{PipelineError, Result};

use crate::command::{CommandOutput, CommandRunner, CommandSpec};

/// Scripted answer to a command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    exit_code: i32,
    stdout: String,
    stderr: String,
    creates: Vec<PathBuf>,
    delay: Option<Duration>,
    spawn_failure: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// The command cannot be started at all.
    pub fn spawn_failure(reason: impl Into<String>) -> Self {
        Self {
            spawn_failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn stdout(mut self, text: impl Into<String>) -> Self {
        self.stdout = text.into();
        self
    }

    pub fn stderr(mut self, text: impl Into<String>) -> Self {
        self.stderr = text.into();
        self
    }

    /// Write an empty file at `path` when the command runs (relative paths
    /// resolve against the command's working directory).
    pub fn creating(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates.push(path.into());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// `CommandRunner` that records every call and answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, Reply)>,
    fallback: Reply,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, pattern: impl Into<String>, reply: Reply) -> Self {
        self.rules.push((pattern.into(), reply));
        self
    }

    /// Reply for commands no rule matches.
    pub fn otherwise(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }

    fn reply_for(&self, line: &str) -> Reply {
        self.rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let reply = self.reply_for(&spec.command_line());

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = reply.spawn_failure {
            return Err(PipelineError::Command {
                program: spec.program.clone(),
                reason,
            });
        }
        for path in &reply.creates {
            let path = match &spec.cwd {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path.clone(),
            };
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"").await?;
        }

        Ok(CommandOutput {
            exit_code: reply.exit_code,
            stdout: reply.stdout,
            stderr: reply.stderr,
            duration_ms: reply.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let runner = ScriptedRunner::new()
            .on("pytest", Reply::exit(1))
            .on("pytest --doctest", Reply::exit(2));
        let out = runner
            .run(&CommandSpec::new("python").args(["-m", "pytest", "--doctest-modules"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_creates_files_relative_to_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on("setup.py", Reply::ok().creating("dist/pkg-1.0.0.tar.gz"));
        runner
            .run(&CommandSpec::new("python").arg("setup.py").cwd(dir.path()))
            .await
            .unwrap();
        assert!(dir.path().join("dist/pkg-1.0.0.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = ScriptedRunner::new().otherwise(Reply::spawn_failure("missing"));
        assert!(runner.run(&CommandSpec::new("x")).await.is_err());
    }
}
