//! Per-phase prompt rendering.
//!
//! Prompts are plain templates over validated arguments. They instruct the
//! agent to answer with the JSON envelope the payload parser expects; the
//! parser, not the prompt, is the enforcement point.

use devflow_agent::PhaseRequest;
use devflow_utils::types::Phase;

/// Render the prompt for a phase request.
#[must_use]
pub fn render_prompt(request: &PhaseRequest) -> String {
    let args = request
        .args
        .iter()
        .map(|a| format!("- {a}"))
        .collect::<Vec<_>>()
        .join("\n");

    match request.phase {
        Phase::Plan => format!(
            "Create an implementation plan for the following work item.\n\
             Inputs:\n{args}\n\n\
             Respond with JSON: {{\"status\": \"success\", \"payload\": {{\"plan\": \"<path or summary of the plan>\"}}}}."
        ),
        Phase::Build => format!(
            "Apply the planned change to the working tree.\n\
             Inputs:\n{args}\n\n\
             Respond with JSON: {{\"status\": ..., \"payload\": {{\"changed_files\": [\"<relative path>\", ...]}}}}."
        ),
        Phase::Test => format!(
            "Run the project's test suite against the change and report findings.\n\
             Inputs:\n{args}\n\n\
             Respond with JSON: {{\"status\": ..., \"payload\": {{\"findings\": [{{\"id\", \"severity\", \"description\", \"location\"?}}]}}}}.\n\
             Severity is one of \"blocker\", \"tech_debt\", \"skippable\"."
        ),
        Phase::Review => format!(
            "Review the change for correctness and report findings.\n\
             Inputs:\n{args}\n\n\
             Respond with JSON: {{\"status\": ..., \"payload\": {{\"findings\": [{{\"id\", \"severity\", \"description\", \"location\"?}}]}}}}.\n\
             Severity is one of \"blocker\", \"tech_debt\", \"skippable\"."
        ),
        Phase::Document => format!(
            "Write documentation for the change.\n\
             Inputs:\n{args}\n\n\
             Respond with JSON: {{\"status\": ..., \"payload\": {{\"documents\": [\"<relative path>\", ...]}}}}."
        ),
        Phase::Resolve => format!(
            "Repair the following blocker finding.\n\
             Finding:\n{args}\n\n\
             Respond with JSON: {{\"status\": ..., \"payload\": {{\"resolved\": [\"<finding id>\", ...], \"unresolved\": [\"<finding id>\", ...]}}}}."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_utils::types::RunId;
    use devflow_validation::validate_prompt;

    fn request(phase: Phase, args: &[&str]) -> PhaseRequest {
        PhaseRequest::new(
            phase,
            RunId::new("RUN-AB12").unwrap(),
            args.iter().map(|a| validate_prompt(a).unwrap()).collect(),
        )
    }

    #[test]
    fn prompt_embeds_every_argument() {
        let prompt = render_prompt(&request(Phase::Plan, &["issue 42", "specs/auth.md"]));
        assert!(prompt.contains("issue 42"));
        assert!(prompt.contains("specs/auth.md"));
    }

    #[test]
    fn each_phase_names_its_payload_schema() {
        assert!(render_prompt(&request(Phase::Build, &["x"])).contains("changed_files"));
        assert!(render_prompt(&request(Phase::Test, &["x"])).contains("findings"));
        assert!(render_prompt(&request(Phase::Document, &["x"])).contains("documents"));
        assert!(render_prompt(&request(Phase::Resolve, &["x"])).contains("resolved"));
    }
}
