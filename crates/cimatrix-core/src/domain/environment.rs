//! Resolved per-leg execution environment and package requirements.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use super::leg::MatrixLeg;

/// A package requirement: name plus optional version constraint.
///
/// Equality, ordering and hashing use the name only, so inserting a spec into
/// a set replaces any earlier decision for the same package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageSpec {
    pub name: String,
    pub version_constraint: Option<String>,
}

impl PackageSpec {
    /// Unconstrained ("latest compatible") requirement.
    pub fn latest(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: None,
        }
    }

    pub fn pinned(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: Some(constraint.into()),
        }
    }

    /// Requirement string as understood by the installer, e.g. `gevent<=1.4`.
    pub fn requirement(&self) -> String {
        match &self.version_constraint {
            Some(c) => format!("{}{}", self.name, c),
            None => self.name.clone(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.version_constraint.is_some()
    }
}

impl PartialEq for PackageSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PackageSpec {}

impl Hash for PackageSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for PackageSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl FromStr for PackageSpec {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~'));
        let (name, constraint) = match split {
            Some(i) => (s[..i].trim(), Some(s[i..].trim())),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "package requirement '{}' has no name",
                s
            )));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(PipelineError::InvalidConfig(format!(
                "package name '{}' contains whitespace",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            version_constraint: constraint.filter(|c| !c.is_empty()).map(str::to_string),
        })
    }
}

impl TryFrom<String> for PackageSpec {
    type Error = PipelineError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PackageSpec> for String {
    fn from(spec: PackageSpec) -> Self {
        spec.requirement()
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.requirement())
    }
}

/// Fully resolved execution environment for one leg.
///
/// Produced by the environment resolver with an empty package set; the
/// installer fills `installed_packages` once the install command succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub leg: MatrixLeg,
    /// Interpreter executable selected for the leg's version.
    pub interpreter: PathBuf,
    pub env_vars: BTreeMap<String, String>,
    pub installed_packages: BTreeSet<PackageSpec>,
}

impl Environment {
    pub fn new(leg: MatrixLeg, interpreter: PathBuf, env_vars: BTreeMap<String, String>) -> Self {
        Self {
            leg,
            interpreter,
            env_vars,
            installed_packages: BTreeSet::new(),
        }
    }

    /// Record a package as installed, replacing any earlier entry for the
    /// same name.
    pub fn record_installed(&mut self, spec: PackageSpec) {
        self.installed_packages.replace(spec);
    }

    pub fn installed(&self, name: &str) -> Option<&PackageSpec> {
        self.installed_packages.iter().find(|p| p.name == name)
    }
}
