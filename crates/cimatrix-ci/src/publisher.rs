//! Conditional documentation publish.
//!
//! Runs only when the docs gate is open. Generates API sources, renders the
//! site, injects a redirecting landing page and force-pushes the result to
//! the hosting branch. Any failure is reported in the returned state and
//! never changes the build result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cimatrix_core::{
    docs_conditions, evaluate, obs, BuildFacts, DocsConfig, DocsPublishState, GateContext,
    PipelineError, Result,
};
use cimatrix_state::{DocumentationHost, PushOutcome};

use crate::command::{CommandRunner, CommandSpec, TemplateVars};
use crate::executor::OUTPUT_TAIL_LINES;

/// Landing page that forwards visitors to `target`.
pub fn redirect_page(target: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta http-equiv="refresh" content="0; url=./{target}">
    <link rel="canonical" href="./{target}">
    <title>Redirecting to {target}</title>
  </head>
  <body>
    <a href="./{target}">{target}</a>
  </body>
</html>
"#,
        target = target
    )
}

pub struct DocsPublisher {
    runner: Arc<dyn CommandRunner>,
    host: Arc<dyn DocumentationHost>,
    config: DocsConfig,
    package: String,
    workdir: PathBuf,
}

impl DocsPublisher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        host: Arc<dyn DocumentationHost>,
        config: DocsConfig,
        package: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            host,
            config,
            package: package.into(),
            workdir: workdir.into(),
        }
    }

    /// Evaluate the gate and, if open, build and push.
    pub async fn publish(&self, ctx: &GateContext, facts: BuildFacts, trunk: &str) -> DocsPublishState {
        if !self.config.enabled {
            let reasons = vec!["documentation publishing is disabled".to_string()];
            obs::emit_gate_evaluated("docs", false, &reasons);
            return DocsPublishState::GateFalse { reasons };
        }

        let verdict = evaluate(&docs_conditions(trunk), ctx, facts);
        obs::emit_gate_evaluated("docs", verdict.open(), &verdict.reasons());
        if !verdict.open() {
            return DocsPublishState::GateFalse {
                reasons: verdict.reasons(),
            };
        }

        match self.build_and_push().await {
            Ok(()) => {
                obs::emit_docs_published(&self.config.hosting_branch);
                DocsPublishState::Pushed {
                    branch: self.config.hosting_branch.clone(),
                }
            }
            Err(e) => {
                obs::emit_docs_failed(&e);
                DocsPublishState::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn run_tool(&self, label: &str, template: &[String], vars: &TemplateVars) -> Result<()> {
        let spec = CommandSpec::from_template(label, template, vars)?
            .cwd(&self.workdir)
            .timeout_secs(self.config.timeout_secs);
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| PipelineError::PublishFailed(format!("{}: {}", label, e)))?;
        if !output.success() {
            return Err(PipelineError::PublishFailed(format!(
                "{} exited with code {}: {}",
                label,
                output.exit_code,
                output.tail(OUTPUT_TAIL_LINES)
            )));
        }
        Ok(())
    }

    /// Build the site in a scratch directory and push it.
    pub async fn build_and_push(&self) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix("cimatrix-docs-")
            .tempdir()
            .map_err(|e| PipelineError::PublishFailed(format!("scratch directory: {}", e)))?;
        let api_dir = scratch.path().join("api");
        let site_dir = scratch.path().join("site");
        tokio::fs::create_dir_all(&api_dir).await?;
        tokio::fs::create_dir_all(&site_dir).await?;

        let vars = TemplateVars::new()
            .with("interpreter", self.config.interpreter.as_str())
            .with("package", self.package.as_str())
            .with("api_dir", path_arg(&api_dir))
            .with("site_dir", path_arg(&site_dir))
            .with("workdir", path_arg(&self.workdir));

        self.run_tool("docs.apidoc", &self.config.apidoc, &vars).await?;
        self.run_tool("docs.render", &self.config.render, &vars).await?;

        tokio::fs::write(
            site_dir.join("index.html"),
            redirect_page(&self.config.redirect_target),
        )
        .await
        .map_err(|e| PipelineError::PublishFailed(format!("writing landing page: {}", e)))?;
        // keep underscore directories (_static, _modules) served as-is
        tokio::fs::write(site_dir.join(".nojekyll"), b"").await?;

        match self
            .host
            .force_push(&site_dir, &self.config.hosting_branch)
            .await
        {
            Ok(PushOutcome::Pushed) => Ok(()),
            Ok(PushOutcome::Rejected(reason)) => Err(PipelineError::PublishFailed(format!(
                "push to {} rejected: {}",
                self.config.hosting_branch, reason
            ))),
            Err(e) => Err(PipelineError::PublishFailed(e.to_string())),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
