use mindgraph_core::{GenerationConfig, Item, Message, MessageRole};

use super::candidates::CandidateSet;

pub const WHY_HOW_SYSTEM_PROMPT: &str = "You analyse personal notes and chat intents. \
Identify why/how relations between the numbered items. \
\"why\": the source item is the reason for the target item. \
\"how\": the source item is the means to achieve the target item. \
Answer with JSON only.";

pub const ROLLUP_SYSTEM_PROMPT: &str = "You organise intents into a hierarchy of goals. \
Answer with a Markdown bullet list only.";

const WHY_HOW_FORMAT: &str = r#"Respond with:
{"relations": [{"source": <index>, "target": <index>, "type": "why" | "how", "reason": "<short reason>"}]}
Only use the indices listed above. Every relation must involve at least one TARGET item."#;

const ROLLUP_FORMAT: &str = "Group the intents under higher-level goals, up to three levels deep. \
Write each node as a bullet indented by two spaces per level: `- [ID] text`. \
Reuse the given IDs for existing intents. Give new goals an ID such as `[NEW]` and \
add an indented `level: <n>` line under them.";

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numbered candidate listing; target items are tagged.
pub fn why_how_prompt(set: &CandidateSet) -> String {
    let mut out = String::from("Items:\n");
    for candidate in &set.candidates {
        let tag = if set.is_target(candidate.index) { " [TARGET]" } else { "" };
        out.push_str(&format!("{}.{} {}", candidate.index, tag, one_line(&candidate.text)));
        if !candidate.path.is_empty() {
            out.push_str(&format!(" (path: {})", candidate.path));
        }
        out.push('\n');
    }
    out.push('\n');
    out.push_str(WHY_HOW_FORMAT);
    out
}

pub fn rollup_prompt(items: &[Item]) -> String {
    let mut out = String::from("Intents:\n");
    for item in items {
        out.push_str(&format!("- [{}] {}\n", item.id, one_line(&item.text)));
    }
    out.push('\n');
    out.push_str(ROLLUP_FORMAT);
    out
}

pub fn chat(system: &str, user: String) -> Vec<Message> {
    vec![
        Message {
            role: MessageRole::System,
            content: system.to_string(),
        },
        Message {
            role: MessageRole::User,
            content: user,
        },
    ]
}

/// Deterministic settings for extraction prompts.
pub fn extraction_config() -> GenerationConfig {
    GenerationConfig {
        temperature: 0.0,
        ..GenerationConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::candidates::{CandidateSelector, IntentGroup};

    #[test]
    fn test_why_how_prompt_lists_indices() {
        let groups = vec![
            IntentGroup::new("g0", vec![Item::new("a", "learn\nrust")]),
            IntentGroup::new("g1", vec![Item::new("b", "ship the tool").with_path("dev")]),
        ];
        let set = CandidateSelector::new(0, 5).select(&groups, 1).unwrap();
        let prompt = why_how_prompt(&set);
        assert!(prompt.contains("0. [TARGET] ship the tool (path: dev)"));
        assert!(prompt.contains("1. learn rust\n"));
        assert!(prompt.contains("\"relations\""));
    }

    #[test]
    fn test_rollup_prompt_uses_ids() {
        let prompt = rollup_prompt(&[Item::new("i1", "buy a bike"), Item::new("i2", "train")]);
        assert!(prompt.contains("- [i1] buy a bike"));
        assert!(prompt.contains("- [i2] train"));
    }
}
