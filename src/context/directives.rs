//! Formatting of user-injected directives for agent prompts.

use conductor_common::{Directive, DirectivePriority};

fn heading(priority: DirectivePriority) -> &'static str {
    match priority {
        DirectivePriority::Critical => "### CRITICAL (must follow)",
        DirectivePriority::High => "### HIGH PRIORITY",
        DirectivePriority::Normal => "### NORMAL",
        DirectivePriority::Suggestion => "### SUGGESTIONS (consider if appropriate)",
    }
}

/// Build the prompt block for the directives that apply to `agent_type`.
///
/// Directives are grouped by priority, most urgent first, keeping the order
/// they were issued in within a group. Returns an empty string when nothing
/// applies.
pub fn directives_block(directives: &[Directive], agent_type: Option<&str>) -> String {
    let mut applicable: Vec<&Directive> = directives
        .iter()
        .filter(|d| d.applies_to(agent_type))
        .collect();
    if applicable.is_empty() {
        return String::new();
    }
    // Stable sort keeps issue order inside each priority.
    applicable.sort_by_key(|d| d.priority);

    let mut block = String::from(
        "## USER DIRECTIVES\nThe user added these instructions while the run was in progress. \
         They take precedence over earlier guidance.\n",
    );
    let mut current: Option<DirectivePriority> = None;
    for directive in applicable {
        if current != Some(directive.priority) {
            block.push('\n');
            block.push_str(heading(directive.priority));
            block.push('\n');
            current = Some(directive.priority);
        }
        block.push_str("- ");
        block.push_str(directive.content.trim());
        block.push('\n');
    }
    block
}
