//! Per-leg step definitions.

use cimatrix_core::{StepConfig, TestsConfig};
use serde::{Deserialize, Serialize};

/// Name of the dependency install step in leg reports.
pub const INSTALL_STEP: &str = "install";

/// Fixed test sequence of a leg.
///
/// `isolated` always runs first and alone; it exercises module-system
/// state that any earlier import would pollute. The follow-ups run after it,
/// in order or concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlan {
    pub isolated: StepConfig,
    pub followups: Vec<StepConfig>,
    pub concurrent_followups: bool,
}

impl TestPlan {
    pub fn from_config(config: &TestsConfig) -> Self {
        Self {
            isolated: config.isolated.clone(),
            followups: vec![config.main.clone(), config.doctest.clone()],
            concurrent_followups: config.concurrent_followups,
        }
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        std::iter::once(self.isolated.name.as_str())
            .chain(self.followups.iter().map(|s| s.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_order() {
        let plan = TestPlan::from_config(&TestsConfig::default());
        assert_eq!(plan.step_names(), vec!["isolated", "main", "doctest"]);
        assert!(!plan.concurrent_followups);
    }
}
