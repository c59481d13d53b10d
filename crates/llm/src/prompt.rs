//! Prompt construction for the three LLM-assisted pipeline stages
//!
//! QueryRewriter, ScopeDetector and AsyncEnricher each need a different
//! shape of LLM call, but all three go through the same `complete`
//! collaborator method, so the prompts are built here as plain strings
//! rather than structured chat turns.

use ragbridge_core::{ConversationTurn, TurnRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

fn render_history(turns: &[ConversationTurn], max_turns: usize) -> String {
    turns
        .iter()
        .rev()
        .take(max_turns)
        .rev()
        .map(|t| {
            let speaker = match t.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
                TurnRole::System => "System",
            };
            format!("{speaker}: {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// QueryRewriter prompt (spec §4.3): fold the last few turns plus any
/// resolved coreferences into one self-contained query string.
pub fn rewrite_prompt(turns: &[ConversationTurn], raw_query: &str) -> String {
    let history = render_history(turns, 4);
    format!(
        "Rewrite the user's latest message into a single, self-contained \
         search query. Resolve pronouns and references to earlier turns. \
         Do not answer the question, only restate it.\n\n\
         Conversation:\n{history}\n\n\
         Latest message: {raw_query}\n\n\
         Rewritten query:"
    )
}

/// ScopeDetector prompt (spec §4.5): ask the model to pick one of the
/// three scope labels given the rewritten query and conversation context.
pub fn scope_prompt(rewritten_query: &str, entity_count_hint: usize) -> String {
    format!(
        "Classify the scope of this smart-home query as exactly one word: \
         micro, macro, or overview.\n\
         - micro: about one specific device or entity\n\
         - macro: about a room, area, or small group of devices\n\
         - overview: about the whole home or a broad summary\n\n\
         Query: {rewritten_query}\n\
         Known candidate entities in context: {entity_count_hint}\n\n\
         Scope:"
    )
}

/// AsyncEnricher prompt (spec §5): summarize a finished turn pair into a
/// short memory note, run out-of-band after the response is sent.
pub fn summary_prompt(user_turn: &str, assistant_turn: &str) -> String {
    format!(
        "Summarize this exchange in one short sentence for future context. \
         Mention any entity, area, or preference the user referred to.\n\n\
         User: {user_turn}\n\
         Assistant: {assistant_turn}\n\n\
         Summary:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole, text: &str, position: usize) -> ConversationTurn {
        ConversationTurn {
            role,
            content: text.to_string(),
            position,
        }
    }

    #[test]
    fn rewrite_prompt_includes_history_and_latest_query() {
        let turns = vec![
            turn(TurnRole::User, "turn off the living room light", 0),
            turn(TurnRole::Assistant, "done", 1),
        ];
        let prompt = rewrite_prompt(&turns, "what about the bedroom one");
        assert!(prompt.contains("living room light"));
        assert!(prompt.contains("what about the bedroom one"));
    }

    #[test]
    fn rewrite_prompt_truncates_to_recent_turns() {
        let turns: Vec<_> = (0..10)
            .map(|i| turn(TurnRole::User, &format!("turn {i}"), i))
            .collect();
        let prompt = rewrite_prompt(&turns, "latest");
        assert!(!prompt.contains("turn 0"));
        assert!(prompt.contains("turn 9"));
    }

    #[test]
    fn scope_prompt_lists_all_three_labels() {
        let prompt = scope_prompt("how is my house doing", 12);
        assert!(prompt.contains("micro"));
        assert!(prompt.contains("macro"));
        assert!(prompt.contains("overview"));
        assert!(prompt.contains("12"));
    }

    #[test]
    fn summary_prompt_embeds_both_turns() {
        let prompt = summary_prompt("what's the kitchen temperature", "72 degrees");
        assert!(prompt.contains("kitchen temperature"));
        assert!(prompt.contains("72 degrees"));
    }
}
