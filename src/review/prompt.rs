//! Reviewer prompt assembly.

use crate::review::findings::{Violation, ViolationStatus};
use std::fmt::Write as _;

/// Output contract appended to every gate prompt.
pub const OUTPUT_INSTRUCTIONS: &str = r#"## Output format

Respond with a single JSON object and nothing else:

{
  "status": "pass" | "fail",
  "violations": [
    {
      "file": "path/relative/to/repo",
      "line": 42,
      "issue": "what is wrong",
      "priority": "critical" | "high" | "medium" | "low",
      "fix": "optional suggestion"
    }
  ]
}

Only report issues on lines added or changed in the diff below. Use "pass"
with an empty violations array when there is nothing to report."#;

/// Gate instructions followed by the output contract.
pub fn build_prompt(gate_name: &str, gate_prompt: &str) -> String {
    let mut prompt = format!("# Review: {}\n\n", gate_name);
    let instructions = gate_prompt.trim();
    if !instructions.is_empty() {
        prompt.push_str(instructions);
        prompt.push_str("\n\n");
    }
    prompt.push_str(OUTPUT_INSTRUCTIONS);
    prompt
}

/// Context block listing what this slot reported last iteration.
///
/// Returns `None` when there is nothing to verify.
pub fn previous_findings_context(previous: &[Violation]) -> Option<String> {
    if previous.is_empty() {
        return None;
    }

    let mut context = String::from("## Previous findings for this review\n\n");
    context.push_str(
        "These were reported in the previous iteration. Confirm whether each is \
         resolved; report any that remain, using the same file and line.\n\n",
    );
    for violation in previous {
        let line = violation
            .line
            .map(|l| format!(":{}", l))
            .unwrap_or_default();
        let _ = write!(
            context,
            "- [{}] {}{} {}",
            violation.priority, violation.file, line, violation.issue
        );
        if violation.status == ViolationStatus::Fixed {
            context.push_str(" (marked fixed)");
        }
        context.push('\n');
    }
    Some(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::findings::Priority;

    #[test]
    fn test_build_prompt_contains_instructions_and_schema() {
        let prompt = build_prompt("code-quality", "  Check naming.  ");
        assert!(prompt.starts_with("# Review: code-quality\n\nCheck naming.\n\n"));
        assert!(prompt.contains("\"status\": \"pass\" | \"fail\""));
    }

    #[test]
    fn test_build_prompt_without_instructions() {
        let prompt = build_prompt("q", "");
        assert!(prompt.starts_with("# Review: q\n\n## Output format"));
    }

    #[test]
    fn test_previous_findings_context() {
        assert!(previous_findings_context(&[]).is_none());

        let context = previous_findings_context(&[
            Violation::new("src/a.rs", Some(3), "Leaks a handle", Priority::High),
            Violation::new("src/b.rs", None, "Missing docs", Priority::Low)
                .with_status(ViolationStatus::Fixed),
        ])
        .unwrap();
        assert!(context.contains("- [high] src/a.rs:3 Leaks a handle\n"));
        assert!(context.contains("- [low] src/b.rs Missing docs (marked fixed)\n"));
    }
}
