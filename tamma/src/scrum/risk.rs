//! Plan risk classification.
//!
//! Thresholds: `high` when the plan touches a sensitive path (auth,
//! security, migrations, CI/CD config), changes more than ten files, or
//! estimates high complexity. `medium` when it changes more than three
//! files, carries any explicit risk entry, or estimates medium complexity.
//! Everything else is `low`.

use glob::Pattern;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::types::{Complexity, DevelopmentPlan};

/// Blast-radius classification of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

const HIGH_FILE_COUNT: usize = 10;
const MEDIUM_FILE_COUNT: usize = 3;

static SENSITIVE_GLOBS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    [
        "**/auth/**",
        "**/security/**",
        "**/*migration*",
        "**/.github/workflows/**",
        "**/Dockerfile",
        "**/*secret*",
    ]
    .iter()
    .filter_map(|g| Pattern::new(g).ok())
    .collect()
});

fn touches_sensitive_path(plan: &DevelopmentPlan) -> bool {
    plan.file_changes.iter().any(|change| {
        SENSITIVE_GLOBS
            .iter()
            .any(|pattern| pattern.matches(&change.path))
    })
}

/// Classifies a plan.
pub fn assess_risk(plan: &DevelopmentPlan) -> RiskLevel {
    let files = plan.file_changes.len();
    if touches_sensitive_path(plan)
        || files > HIGH_FILE_COUNT
        || plan.estimated_complexity == Complexity::High
    {
        return RiskLevel::High;
    }
    if files > MEDIUM_FILE_COUNT
        || !plan.risks.is_empty()
        || plan.estimated_complexity == Complexity::Medium
    {
        return RiskLevel::Medium;
    }
    RiskLevel::Low
}
