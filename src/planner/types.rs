use serde::{Deserialize, Serialize};

/// A declarative list of work items with expected metric impact, executed
/// sequentially by the plan runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Plan {
    pub id: String,
    pub as_of: String,
    pub generated_at: String,
    #[serde(default)]
    pub okrs_dir: String,
    #[serde(default)]
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanItem {
    pub id: String,
    pub objective_id: String,
    pub kr_id: String,
    pub hypothesis: String,
    pub task: String,
    pub agent_role: String,
    pub expected_metric_change: ExpectedMetricChange,
    #[serde(default)]
    pub evidence_plan: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExpectedMetricChange {
    pub metric_key: String,
    pub direction: String,
    pub baseline: f64,
    pub target: f64,
    pub delta: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub confidence: f64,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}
