//! Prompt builders and the plan JSON schema for the coding subprocess.

use serde_json::{json, Value};

use crate::types::{DevelopmentPlan, Issue};

/// JSON schema a generated plan must satisfy.
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "required": ["issue_number", "summary", "approach", "file_changes", "estimated_complexity"],
        "properties": {
            "issue_number": { "type": "integer" },
            "summary": { "type": "string" },
            "approach": { "type": "string" },
            "file_changes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["path", "action", "description"],
                    "properties": {
                        "path": { "type": "string" },
                        "action": { "type": "string", "enum": ["create", "modify", "delete"] },
                        "description": { "type": "string" }
                    }
                }
            },
            "testing_strategy": { "type": "string" },
            "estimated_complexity": { "type": "string", "enum": ["low", "medium", "high"] },
            "risks": { "type": "array", "items": { "type": "string" } }
        }
    })
}

/// Planning prompt: the issue, its discussion, and retrieved context.
pub fn plan_prompt(issue: &Issue, analysis: &str, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Analyze this issue and produce a development plan as JSON matching the provided schema.\n\n\
         Issue #{}: {}\n\n{analysis}\n",
        issue.number, issue.title,
    );
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str("\nRelevant repository context:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRespond with only the JSON plan. List every file you expect to touch, \
         a concrete testing strategy, and any risks.",
    );
    prompt
}

/// Implementation prompt: the approved plan plus working constraints.
pub fn implement_prompt(
    plan: &DevelopmentPlan,
    branch: &str,
    working_dir: &str,
    review_feedback: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Implement the following plan for issue #{} on branch `{branch}` \
         (working directory: {working_dir}).\n\n\
         Summary: {}\n\nApproach:\n{}\n\nPlanned file changes:\n",
        plan.issue_number, plan.summary, plan.approach,
    );
    for change in &plan.file_changes {
        prompt.push_str(&format!(
            "- {:?} {}: {}\n",
            change.action, change.path, change.description
        ));
    }
    prompt.push_str(&format!("\nTesting strategy:\n{}\n", plan.testing_strategy));
    if let Some(feedback) = review_feedback.filter(|f| !f.is_empty()) {
        prompt.push_str(&format!(
            "\nA previous attempt was reviewed; address this feedback:\n{feedback}\n"
        ));
    }
    prompt.push_str(
        "\nMake the changes, run the tests, and commit on the branch. \
         Stay within the planned scope.",
    );
    prompt
}

/// Extracts a plan object from the agent's output: direct JSON first, then
/// a fenced ```json block.
pub fn parse_plan(output: &str, issue_number: u64) -> Option<DevelopmentPlan> {
    let attempt = |text: &str| -> Option<DevelopmentPlan> {
        serde_json::from_str::<DevelopmentPlan>(text.trim()).ok()
    };
    if let Some(plan) = attempt(output) {
        return Some(normalize(plan, issue_number));
    }
    let fenced = output
        .split("```")
        .skip(1)
        .step_by(2)
        .map(|block| block.strip_prefix("json").unwrap_or(block));
    for block in fenced {
        if let Some(plan) = attempt(block) {
            return Some(normalize(plan, issue_number));
        }
    }
    None
}

fn normalize(mut plan: DevelopmentPlan, issue_number: u64) -> DevelopmentPlan {
    // The agent occasionally echoes the wrong number; the engine's issue wins.
    plan.issue_number = issue_number;
    plan
}
