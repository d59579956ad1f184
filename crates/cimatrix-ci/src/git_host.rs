//! Documentation host that force-pushes a rendered site to a git branch.
//!
//! The site directory becomes a fresh single-commit repository whose only
//! branch overwrites the hosting branch on the remote, so the branch always
//! holds exactly the latest push.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cimatrix_state::{DocumentationHost, PushOutcome, StorageError, StorageResult};

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::executor::OUTPUT_TAIL_LINES;

const COMMIT_MESSAGE: &str = "Publish documentation";

pub struct GitDocHost {
    runner: Arc<dyn CommandRunner>,
    /// Remote name (resolved in `repo_dir`) or URL.
    remote: String,
    repo_dir: PathBuf,
    author_name: String,
    author_email: String,
    timeout_secs: u64,
}

impl GitDocHost {
    pub fn new(runner: Arc<dyn CommandRunner>, remote: impl Into<String>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            remote: remote.into(),
            repo_dir: repo_dir.into(),
            author_name: "cimatrix".to_string(),
            author_email: "cimatrix@localhost".to_string(),
            timeout_secs: 300,
        }
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    fn looks_like_url(remote: &str) -> bool {
        remote.contains("://") || remote.contains('@') || remote.starts_with('/')
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> StorageResult<CommandOutput> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .cwd(dir)
            .timeout_secs(self.timeout_secs);
        self.runner
            .run(&spec)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn remote_url(&self) -> StorageResult<String> {
        if Self::looks_like_url(&self.remote) {
            return Ok(self.remote.clone());
        }
        let output = self
            .git(&self.repo_dir, &["remote", "get-url", self.remote.as_str()])
            .await?;
        let url = output.stdout.trim();
        if !output.success() || url.is_empty() {
            return Err(StorageError::Backend(format!(
                "cannot resolve git remote '{}': {}",
                self.remote,
                output.tail(OUTPUT_TAIL_LINES)
            )));
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl DocumentationHost for GitDocHost {
    async fn force_push(&self, site_dir: &Path, target_branch: &str) -> StorageResult<PushOutcome> {
        if !site_dir.is_dir() {
            return Err(StorageError::SiteNotFound {
                path: site_dir.display().to_string(),
            });
        }
        let url = self.remote_url().await?;

        let user_name = format!("user.name={}", self.author_name);
        let user_email = format!("user.email={}", self.author_email);
        let refspec = format!("HEAD:refs/heads/{}", target_branch);
        let steps: [Vec<&str>; 4] = [
            vec!["init", "-q"],
            vec!["checkout", "-q", "-b", target_branch],
            vec!["add", "-A"],
            vec![
                "-c",
                user_name.as_str(),
                "-c",
                user_email.as_str(),
                "commit",
                "-q",
                "-m",
                COMMIT_MESSAGE,
            ],
        ];
        for args in &steps {
            let output = self.git(site_dir, args).await?;
            if !output.success() {
                return Err(StorageError::Backend(format!(
                    "git {} failed: {}",
                    args.join(" "),
                    output.tail(OUTPUT_TAIL_LINES)
                )));
            }
        }

        let output = self
            .git(site_dir, &["push", "--force", "-q", url.as_str(), refspec.as_str()])
            .await?;
        if output.success() {
            Ok(PushOutcome::Pushed)
        } else {
            Ok(PushOutcome::Rejected(output.tail(OUTPUT_TAIL_LINES)))
        }
    }
}
