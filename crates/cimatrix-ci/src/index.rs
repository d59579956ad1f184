//! Package index backed by an upload command (twine-style).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cimatrix_core::DeployConfig;
use cimatrix_state::{
    Credentials, PackageArtifact, PackageIndex, StorageError, StorageResult, UploadOutcome,
};

use crate::command::{CommandOutput, CommandRunner, CommandSpec, TemplateVars};
use crate::executor::OUTPUT_TAIL_LINES;

/// Phrases upload tools print when the version is already on the index.
const ALREADY_EXISTS_MARKERS: &[&str] = &["already exist", "this filename has already been used"];

/// Map an upload command's output to an outcome. The "already exists"
/// markers win over the exit code: some tools exit 0 when skipping.
pub fn classify_upload(output: &CommandOutput) -> UploadOutcome {
    if ALREADY_EXISTS_MARKERS
        .iter()
        .any(|marker| output.contains_ignore_case(marker))
    {
        UploadOutcome::AlreadyExists
    } else if output.success() {
        UploadOutcome::Published
    } else {
        UploadOutcome::Rejected(format!(
            "upload exited with code {}: {}",
            output.exit_code,
            output.tail(OUTPUT_TAIL_LINES)
        ))
    }
}

pub struct CommandPackageIndex {
    runner: Arc<dyn CommandRunner>,
    upload: Vec<String>,
    interpreter: String,
    username_var: String,
    password_var: String,
    workdir: PathBuf,
    timeout_secs: u64,
}

impl CommandPackageIndex {
    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &DeployConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            upload: config.upload.clone(),
            interpreter: config.interpreter.clone(),
            username_var: config.upload_username_var.clone(),
            password_var: config.upload_password_var.clone(),
            workdir: workdir.into(),
            timeout_secs: config.timeout_secs,
        }
    }
}

#[async_trait]
impl PackageIndex for CommandPackageIndex {
    async fn upload(
        &self,
        artifact: &PackageArtifact,
        credentials: &Credentials,
    ) -> StorageResult<UploadOutcome> {
        if artifact.files.is_empty() {
            return Err(StorageError::EmptyArtifact {
                name: artifact.name.clone(),
                version: artifact.version.clone(),
            });
        }

        let vars = TemplateVars::new()
            .with("interpreter", self.interpreter.as_str())
            .with("package", artifact.name.as_str())
            .with("version", artifact.version.as_str())
            .with_files(artifact.files.iter().map(|f| f.display().to_string()));
        let spec = CommandSpec::from_template("deploy.upload", &self.upload, &vars)
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .cwd(&self.workdir)
            .timeout_secs(self.timeout_secs)
            .secret_env(self.username_var.as_str(), credentials.username.as_str())
            .secret_env(self.password_var.as_str(), credentials.password());

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(classify_upload(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Reply, ScriptedRunner};

    fn artifact() -> PackageArtifact {
        PackageArtifact::new(
            "easypy",
            "1.2.3",
            vec![
                PathBuf::from("/w/dist/easypy-1.2.3.tar.gz"),
                PathBuf::from("/w/dist/easypy-1.2.3-py3-none-any.whl"),
            ],
        )
    }

    fn output(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify_upload(&output(0, "")), UploadOutcome::Published);
        assert_eq!(
            classify_upload(&output(1, "HTTPError: 400 File already exists.")),
            UploadOutcome::AlreadyExists
        );
        assert_eq!(
            classify_upload(&output(0, "Skipping easypy-1.2.3.tar.gz because it appears to already exist")),
            UploadOutcome::AlreadyExists
        );
        assert!(matches!(
            classify_upload(&output(1, "403 Forbidden")),
            UploadOutcome::Rejected(ref r) if r.contains("403")
        ));
    }

    #[tokio::test]
    async fn test_upload_passes_files_and_secret_env() {
        let runner = Arc::new(ScriptedRunner::new());
        let index = CommandPackageIndex::from_config(runner.clone(), &DeployConfig::default(), "/w");
        let outcome = index
            .upload(&artifact(), &Credentials::new("deployer", "hunter2"))
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Published);

        let calls = runner.calls();
        let call = &calls[0];
        assert!(call.command_line().ends_with(
            "twine upload --non-interactive /w/dist/easypy-1.2.3.tar.gz /w/dist/easypy-1.2.3-py3-none-any.whl"
        ));
        let keys: Vec<&str> = call.secret_keys().collect();
        assert_eq!(keys, vec!["TWINE_PASSWORD", "TWINE_USERNAME"]);
        assert!(!format!("{:?}", call).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_upload_maps_existing_version() {
        let runner = Arc::new(ScriptedRunner::new().on("twine", Reply::exit(1).stderr("400 File already exists")));
        let index = CommandPackageIndex::from_config(runner, &DeployConfig::default(), "/w");
        let outcome = index
            .upload(&artifact(), &Credentials::new("deployer", "hunter2"))
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_runner_failure_is_backend_error() {
        let runner = Arc::new(ScriptedRunner::new().otherwise(Reply::spawn_failure("python3 missing")));
        let index = CommandPackageIndex::from_config(runner, &DeployConfig::default(), "/w");
        let err = index
            .upload(&artifact(), &Credentials::new("deployer", "hunter2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
