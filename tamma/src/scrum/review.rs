//! Post-implementation quality review.
//!
//! Scoring is heuristic over the agent's reported output: missing summary,
//! failure markers, an unexercised testing strategy, planned files never
//! mentioned, and cost overrun each subtract from a perfect score.

use serde::Serialize;

use crate::provider::TaskResult;
use crate::types::DevelopmentPlan;

/// Review thresholds.
#[derive(Clone, Debug, Serialize)]
pub struct ReviewConfig {
    /// Scores below this re-enter implementation with feedback.
    pub score_threshold: f32,
    /// Budget the cost delta is judged against.
    pub cost_budget_usd: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            cost_budget_usd: 5.0,
        }
    }
}

/// Outcome of one review pass.
#[derive(Clone, Debug, Serialize)]
pub struct ReviewOutcome {
    pub score: f32,
    pub passed: bool,
    pub issues: Vec<String>,
    pub summary: String,
}

impl ReviewOutcome {
    /// Feedback string appended to the next implementation prompt.
    pub fn feedback(&self) -> String {
        self.issues.join("; ")
    }
}

/// Reviews an implementation result against its plan.
pub fn review_implementation(
    plan: &DevelopmentPlan,
    result: &TaskResult,
    config: &ReviewConfig,
) -> ReviewOutcome {
    let mut score = 1.0f32;
    let mut issues = Vec::new();
    let output = result.output.to_lowercase();

    if output.trim().is_empty() {
        score -= 0.4;
        issues.push("no implementation summary was produced".to_string());
    }
    if output.contains("failed") || output.contains("error:") {
        score -= 0.2;
        issues.push("output reports failures".to_string());
    }
    if !plan.testing_strategy.trim().is_empty() && !output.contains("test") {
        score -= 0.2;
        issues.push("testing strategy was not exercised".to_string());
    }
    let mentions_planned_file = plan
        .file_changes
        .iter()
        .any(|change| output.contains(&change.path.to_lowercase()));
    if !plan.file_changes.is_empty() && !mentions_planned_file {
        score -= 0.2;
        issues.push("planned files are not referenced in the result".to_string());
    }
    if result.cost_usd > config.cost_budget_usd {
        score -= 0.2;
        issues.push(format!(
            "cost ${:.2} exceeded the ${:.2} budget",
            result.cost_usd, config.cost_budget_usd
        ));
    }

    let score = score.max(0.0);
    let passed = score >= config.score_threshold;
    ReviewOutcome {
        score,
        passed,
        summary: format!(
            "score {score:.2} ({} issue{})",
            issues.len(),
            if issues.len() == 1 { "" } else { "s" }
        ),
        issues,
    }
}
