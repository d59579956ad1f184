//! Version-conditional dependency pinning.
//!
//! A [`PinningTable`] is an ordered list of `(predicate, package)` rules. For
//! every package named in the table, the first rule whose predicate matches
//! the leg's interpreter version decides the requirement; a package no rule
//! matches installs unconstrained.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{PackageSpec, PipelineError, Result};

/// Predicate over an interpreter-version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPredicate {
    Any,
    Equals(String),
    Prefix(String),
    /// Full-match regular expression.
    Matches(String),
}

impl VersionPredicate {
    pub fn matches(&self, version: &str) -> Result<bool> {
        match self {
            VersionPredicate::Any => Ok(true),
            VersionPredicate::Equals(v) => Ok(v == version),
            VersionPredicate::Prefix(p) => Ok(version.starts_with(p.as_str())),
            VersionPredicate::Matches(pattern) => {
                let re = compile_anchored(pattern)?;
                Ok(re.is_match(version))
            }
        }
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
        PipelineError::InvalidConfig(format!("bad version pattern '{}': {}", pattern, e))
    })
}

/// One `(predicate -> requirement)` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRule {
    pub when: VersionPredicate,
    pub package: PackageSpec,
}

impl PinRule {
    pub fn new(when: VersionPredicate, package: PackageSpec) -> Self {
        Self { when, package }
    }
}

/// Ordered rule table, first match wins per package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PinningTable {
    pub rules: Vec<PinRule>,
}

impl PinningTable {
    pub fn new(rules: Vec<PinRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: PinRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Compile every regex once so bad patterns surface at config load.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if let VersionPredicate::Matches(pattern) = &rule.when {
                compile_anchored(pattern)?;
            }
        }
        Ok(())
    }

    /// Requirements selected for `version`, in first-mention order of the
    /// package names.
    pub fn select(&self, version: &str) -> Result<Vec<PackageSpec>> {
        let mut names: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !names.contains(&rule.package.name.as_str()) {
                names.push(&rule.package.name);
            }
        }

        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let mut chosen = None;
            for rule in self.rules.iter().filter(|r| r.package.name == name) {
                if rule.when.matches(version)? {
                    chosen = Some(rule.package.clone());
                    break;
                }
            }
            selected.push(chosen.unwrap_or_else(|| PackageSpec::latest(name)));
        }
        Ok(selected)
    }
}

/// Base packages followed by the pinning decisions; a later entry for the
/// same name replaces the earlier one in place.
pub fn resolve_install_set(
    base: &[PackageSpec],
    table: &PinningTable,
    version: &str,
) -> Result<Vec<PackageSpec>> {
    let mut out: Vec<PackageSpec> = Vec::with_capacity(base.len() + table.rules.len());
    for spec in base.iter().cloned().chain(table.select(version)?) {
        match out.iter_mut().find(|p| **p == spec) {
            Some(existing) => *existing = spec,
            None => out.push(spec),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_table() -> PinningTable {
        PinningTable::new(vec![PinRule::new(
            VersionPredicate::Equals("3.5".to_string()),
            PackageSpec::pinned("gevent", "<=1.4"),
        )])
    }

    #[test]
    fn test_legacy_version_gets_pin() {
        let selected = legacy_table().select("3.5").unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].requirement(), "gevent<=1.4");
    }

    #[test]
    fn test_other_versions_get_latest() {
        for version in ["3.6", "3.7", "3.8-dev", "3.5.1"] {
            let selected = legacy_table().select(version).unwrap();
            assert_eq!(selected[0], PackageSpec::latest("gevent"));
            assert!(!selected[0].is_pinned(), "{} should be unpinned", version);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let table = PinningTable::new(vec![
            PinRule::new(
                VersionPredicate::Prefix("2.".to_string()),
                PackageSpec::pinned("pyyaml", "<6"),
            ),
            PinRule::new(VersionPredicate::Any, PackageSpec::pinned("pyyaml", ">=6")),
        ]);
        assert_eq!(table.select("2.7").unwrap()[0].requirement(), "pyyaml<6");
        assert_eq!(table.select("3.7").unwrap()[0].requirement(), "pyyaml>=6");
    }

    #[test]
    fn test_regex_predicate_is_anchored() {
        let pred = VersionPredicate::Matches(r"3\.[0-5]".to_string());
        assert!(pred.matches("3.5").unwrap());
        assert!(!pred.matches("3.50").unwrap());
        assert!(!pred.matches("13.5").unwrap());
    }

    #[test]
    fn test_invalid_regex_rejected_on_validate() {
        let table = PinningTable::new(vec![PinRule::new(
            VersionPredicate::Matches("(".to_string()),
            PackageSpec::latest("x"),
        )]);
        assert!(matches!(
            table.validate().unwrap_err(),
            PipelineError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_resolve_install_set_overrides_base() {
        let base = vec![
            PackageSpec::latest("pytest"),
            PackageSpec::pinned("gevent", ">=20"),
            PackageSpec::latest("pyyaml"),
        ];
        let set = resolve_install_set(&base, &legacy_table(), "3.5").unwrap();
        let reqs: Vec<String> = set.iter().map(PackageSpec::requirement).collect();
        assert_eq!(reqs, vec!["pytest", "gevent<=1.4", "pyyaml"]);
    }

    #[test]
    fn test_rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            pins: PinningTable,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[pins]]
            when = { equals = "3.5" }
            package = "gevent<=1.4"

            [[pins]]
            when = "any"
            package = "gevent"
            "#,
        )
        .unwrap();
        assert_eq!(doc.pins.rules.len(), 2);
        assert_eq!(doc.pins.select("3.5").unwrap()[0].requirement(), "gevent<=1.4");
        assert_eq!(doc.pins.select("3.7").unwrap()[0].requirement(), "gevent");
    }
}
