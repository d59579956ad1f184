//! Post-build gates.
//!
//! Evaluates a [`GateContext`] (plus the joined build result) to decide
//! whether documentation publish and package deploy run. Each gate reports
//! every unmet condition so a skipped action can be explained in the build
//! report.

use serde::{Deserialize, Serialize};

use crate::domain::GateContext;

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A single condition a gate requires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateCondition {
    /// The evaluating leg is the leg of record.
    LegOfRecord,
    /// The build ran on the trunk branch.
    TrunkBranch { trunk: String },
    /// The triggering event is not a pull request.
    NotPullRequest,
    /// Every leg of the build succeeded.
    BuildSucceeded,
    /// The triggering event carries a version tag.
    TagPresent,
    /// The build was not cancelled.
    NotCancelled,
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// A single unmet condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateViolation {
    pub condition: GateCondition,
    pub reason: String,
}

/// The outcome of evaluating a gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Violations found (empty when open).
    pub violations: Vec<GateViolation>,
}

impl GateVerdict {
    /// Whether the gate is open (no violations).
    pub fn open(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.reason.clone()).collect()
    }
}

/// Inputs that are not part of the gate context itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildFacts {
    pub success: bool,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

fn check(condition: &GateCondition, ctx: &GateContext, facts: BuildFacts) -> Option<String> {
    match condition {
        GateCondition::LegOfRecord if !ctx.is_leg_of_record => {
            Some("not the leg of record".to_string())
        }
        GateCondition::TrunkBranch { trunk } if &ctx.branch != trunk => Some(format!(
            "branch '{}' is not the trunk branch '{}'",
            ctx.branch, trunk
        )),
        GateCondition::NotPullRequest if ctx.is_pull_request => {
            Some("pull request builds never publish".to_string())
        }
        GateCondition::BuildSucceeded if !facts.success => {
            Some("build did not succeed".to_string())
        }
        GateCondition::TagPresent if !ctx.has_tag => Some("no version tag on this event".to_string()),
        GateCondition::NotCancelled if facts.cancelled => Some("build was cancelled".to_string()),
        _ => None,
    }
}

/// Evaluate `conditions` in order, collecting every violation.
pub fn evaluate(conditions: &[GateCondition], ctx: &GateContext, facts: BuildFacts) -> GateVerdict {
    let violations = conditions
        .iter()
        .filter_map(|condition| {
            check(condition, ctx, facts).map(|reason| GateViolation {
                condition: condition.clone(),
                reason,
            })
        })
        .collect();
    GateVerdict { violations }
}

/// Conditions of the documentation gate.
pub fn docs_conditions(trunk: &str) -> Vec<GateCondition> {
    vec![
        GateCondition::NotCancelled,
        GateCondition::LegOfRecord,
        GateCondition::TrunkBranch {
            trunk: trunk.to_string(),
        },
        GateCondition::NotPullRequest,
        GateCondition::BuildSucceeded,
    ]
}

/// Conditions of the deploy gate.
pub fn deploy_conditions(require_success: bool) -> Vec<GateCondition> {
    let mut conditions = vec![GateCondition::NotCancelled, GateCondition::TagPresent];
    if require_success {
        conditions.push(GateCondition::BuildSucceeded);
    }
    conditions
}

/// `publish_docs = leg_of_record AND branch == trunk AND NOT pull_request AND success`.
pub fn publish_docs(ctx: &GateContext, trunk: &str, build_success: bool) -> bool {
    evaluate(
        &docs_conditions(trunk),
        ctx,
        BuildFacts {
            success: build_success,
            cancelled: false,
        },
    )
    .open()
}

/// `deploy = has_tag`.
pub fn deploy_release(ctx: &GateContext) -> bool {
    evaluate(
        &deploy_conditions(false),
        ctx,
        BuildFacts {
            success: true,
            cancelled: false,
        },
    )
    .open()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(record: bool, branch: &str, pr: bool, tag: bool) -> GateContext {
        GateContext {
            is_leg_of_record: record,
            branch: branch.to_string(),
            is_pull_request: pr,
            has_tag: tag,
        }
    }

    #[test]
    fn test_docs_gate_all_conditions_hold() {
        assert!(publish_docs(&ctx(true, "trunk", false, false), "trunk", true));
    }

    #[test]
    fn test_docs_gate_any_single_flip_closes() {
        assert!(!publish_docs(&ctx(false, "trunk", false, false), "trunk", true));
        assert!(!publish_docs(&ctx(true, "feature", false, false), "trunk", true));
        assert!(!publish_docs(&ctx(true, "trunk", true, false), "trunk", true));
        assert!(!publish_docs(&ctx(true, "trunk", false, false), "trunk", false));
    }

    #[test]
    fn test_docs_gate_reports_every_violation() {
        let verdict = evaluate(
            &docs_conditions("trunk"),
            &ctx(false, "feature", true, false),
            BuildFacts {
                success: false,
                cancelled: false,
            },
        );
        assert!(!verdict.open());
        assert_eq!(verdict.violations.len(), 4);
    }

    #[test]
    fn test_cancelled_build_closes_both_gates() {
        let facts = BuildFacts {
            success: true,
            cancelled: true,
        };
        let c = ctx(true, "trunk", false, true);
        assert!(!evaluate(&docs_conditions("trunk"), &c, facts).open());
        assert!(!evaluate(&deploy_conditions(false), &c, facts).open());
    }

    #[test]
    fn test_deploy_gate_tag_only() {
        assert!(deploy_release(&ctx(false, "v1.2.3", false, true)));
        assert!(!deploy_release(&ctx(true, "trunk", false, false)));
    }

    #[test]
    fn test_deploy_gate_independent_of_build_unless_required() {
        let c = ctx(false, "v1.2.3", false, true);
        let failed = BuildFacts {
            success: false,
            cancelled: false,
        };
        assert!(evaluate(&deploy_conditions(false), &c, failed).open());
        assert!(!evaluate(&deploy_conditions(true), &c, failed).open());
    }
}
