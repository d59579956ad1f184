//! Environment resolution: `MatrixLeg -> Environment`.
//!
//! Resolution only looks up the interpreter and assembles environment
//! variables; nothing is installed or executed here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Environment, MatrixLeg, PipelineError, Result};

/// Where interpreters for each version live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterCatalog {
    /// Explicit `version -> executable` entries, consulted first.
    pub explicit: BTreeMap<String, PathBuf>,
    /// Executable name searched on `PATH`, `{version}` substituted.
    /// `None` disables discovery.
    pub discover: Option<String>,
}

impl Default for InterpreterCatalog {
    fn default() -> Self {
        Self {
            explicit: BTreeMap::new(),
            discover: Some("python{version}".to_string()),
        }
    }
}

impl InterpreterCatalog {
    /// Catalog with only explicit entries and no `PATH` discovery.
    pub fn fixed<I, V, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (V, P)>,
        V: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            explicit: entries
                .into_iter()
                .map(|(v, p)| (v.into(), p.into()))
                .collect(),
            discover: None,
        }
    }

    pub fn locate(&self, version: &str) -> Option<PathBuf> {
        if let Some(path) = self.explicit.get(version) {
            return Some(path.clone());
        }
        let template = self.discover.as_ref()?;
        let name = template.replace("{version}", version);
        match which::which(&name) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(version = %version, candidate = %name, error = %e, "interpreter not found on PATH");
                None
            }
        }
    }
}

/// Settings applied to every resolved environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Fixed timezone so timestamp-parsing tests are locale independent.
    pub timezone: String,
    /// Variable carrying the concurrency toggle (`true` / `false`).
    pub concurrency_var: String,
    /// Additional variables for every leg.
    pub extra: BTreeMap<String, String>,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Jerusalem".to_string(),
            concurrency_var: "GEVENT".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Deterministic resolver from leg to environment.
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    catalog: InterpreterCatalog,
    settings: EnvironmentSettings,
}

impl EnvironmentResolver {
    pub fn new(catalog: InterpreterCatalog, settings: EnvironmentSettings) -> Self {
        Self { catalog, settings }
    }

    pub fn resolve(&self, leg: &MatrixLeg) -> Result<Environment> {
        let interpreter = self.catalog.locate(&leg.interpreter_version).ok_or_else(|| {
            PipelineError::EnvironmentUnavailable {
                version: leg.interpreter_version.clone(),
            }
        })?;

        let mut env_vars = self.settings.extra.clone();
        env_vars.insert("TZ".to_string(), self.settings.timezone.clone());
        env_vars.insert(
            self.settings.concurrency_var.clone(),
            leg.concurrency_enabled.to_string(),
        );
        env_vars.insert(
            "CIMATRIX_INTERPRETER_VERSION".to_string(),
            leg.interpreter_version.clone(),
        );
        env_vars.insert("CIMATRIX_LEG".to_string(), leg.slug());

        Ok(Environment::new(leg.clone(), interpreter, env_vars))
    }
}
