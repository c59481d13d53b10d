//! ConversationAnalyzer (spec §4.2)
//!
//! Pattern-based, pure local computation over the most recent user turn,
//! biased by prior turns. No network, no LLM — p95 target is 50ms, far
//! below what an out-of-process call could hit.

use ragbridge_config::AliasTables;
use ragbridge_core::state::ConversationContext;
use ragbridge_core::types::{ConversationTurn, Intent, TurnRole};

const READ_CUES: &[&str] = &["how much", "how many", "is it", "what is", "what's", "what are"];
const CONTROL_CUES: &[&str] = &["turn on", "turn off", "set ", "open ", "close ", "dim ", "lock ", "unlock "];
const FOLLOW_UP_CUES: &[&str] = &["and ", "what about", "how about", "outside?", "out there"];

fn normalize(s: &str) -> String {
    s.to_lowercase()
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn detect_areas(text: &str, aliases: &AliasTables) -> (Vec<String>, f32) {
    let tokens = tokenize(text);
    let mut found = Vec::new();
    // Single tokens and adjacent bigrams, since area names are often two words.
    for window in 1..=2 {
        for chunk in tokens.windows(window) {
            let candidate = chunk.join(" ");
            if let Some(area) = aliases.resolve_area(&candidate) {
                if !found.contains(&area.to_string()) {
                    found.push(area.to_string());
                }
            }
        }
    }
    let confidence = if found.is_empty() { 0.5 } else { 0.9 };
    (found, confidence)
}

fn detect_domains(text: &str, aliases: &AliasTables) -> (Vec<String>, f32) {
    let tokens = tokenize(text);
    let mut found = Vec::new();
    for token in &tokens {
        if let Some(domain) = aliases.resolve_domain(token) {
            if !found.contains(&domain.to_string()) {
                found.push(domain.to_string());
            }
        }
    }
    let confidence = if found.is_empty() { 0.5 } else { 0.9 };
    (found, confidence)
}

fn detect_intent(text: &str) -> (Intent, f32) {
    let normalized = normalize(text);
    let is_control = CONTROL_CUES.iter().any(|cue| normalized.contains(cue));
    let is_read = READ_CUES.iter().any(|cue| normalized.contains(cue));

    match (is_control, is_read) {
        (true, _) => (Intent::Control, 0.85),
        (false, true) => (Intent::Read, 0.85),
        (false, false) => (Intent::Unknown, 0.4),
    }
}

fn detect_follow_up(latest: &str, has_prior_turn: bool) -> (bool, f32) {
    let normalized = normalize(latest);
    let has_cue = FOLLOW_UP_CUES.iter().any(|cue| normalized.contains(cue))
        || normalized.trim_end_matches('?').split_whitespace().count() <= 3;
    let is_follow_up = has_cue && has_prior_turn;
    (is_follow_up, if is_follow_up { 0.8 } else { 0.95 })
}

/// Analyze the latest user turn (spec §4.2). Returns default/zero-confidence
/// output if there is no user turn at all.
pub fn analyze_conversation(turns: &[ConversationTurn], aliases: &AliasTables) -> ConversationContext {
    let latest_user = turns.iter().rev().find(|t| t.role == TurnRole::User);
    let Some(latest_user) = latest_user else {
        return ConversationContext::default();
    };

    let has_prior_turn = turns.iter().any(|t| t.position < latest_user.position);

    let (areas, area_conf) = detect_areas(&latest_user.content, aliases);
    let (domains, domain_conf) = detect_domains(&latest_user.content, aliases);
    let (intent, intent_conf) = detect_intent(&latest_user.content);
    let (is_follow_up, follow_up_conf) = detect_follow_up(&latest_user.content, has_prior_turn);

    let confidence = [area_conf, domain_conf, intent_conf, follow_up_conf]
        .into_iter()
        .fold(f32::MAX, f32::min);

    ConversationContext {
        areas,
        domains,
        intent: Some(intent),
        is_follow_up,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases_with(area_alias: &str, area_id: &str, domain_alias: &str, domain: &str) -> AliasTables {
        let mut tables = AliasTables::default();
        tables.area_aliases.insert(area_alias.to_string(), area_id.to_string());
        tables.domain_aliases.insert(domain_alias.to_string(), domain.to_string());
        tables
    }

    fn turn(role: TurnRole, content: &str, position: usize) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
            position,
        }
    }

    #[test]
    fn detects_control_intent_and_area() {
        let aliases = aliases_with("living room", "living_room", "light", "light");
        let turns = vec![turn(TurnRole::User, "turn on the living room light", 0)];
        let ctx = analyze_conversation(&turns, &aliases);
        assert_eq!(ctx.intent, Some(Intent::Control));
        assert_eq!(ctx.areas, vec!["living_room".to_string()]);
        assert_eq!(ctx.domains, vec!["light".to_string()]);
        assert!(!ctx.is_follow_up);
    }

    #[test]
    fn detects_read_intent() {
        let aliases = AliasTables::default();
        let turns = vec![turn(TurnRole::User, "how much energy did we use today", 0)];
        let ctx = analyze_conversation(&turns, &aliases);
        assert_eq!(ctx.intent, Some(Intent::Read));
    }

    #[test]
    fn follow_up_requires_prior_turn() {
        let aliases = AliasTables::default();
        let turns = vec![
            turn(TurnRole::User, "how warm is the living room", 0),
            turn(TurnRole::Assistant, "23 degrees", 1),
            turn(TurnRole::User, "and outside?", 2),
        ];
        let ctx = analyze_conversation(&turns, &aliases);
        assert!(ctx.is_follow_up);
    }

    #[test]
    fn no_follow_up_without_prior_turn() {
        let aliases = AliasTables::default();
        let turns = vec![turn(TurnRole::User, "and outside?", 0)];
        let ctx = analyze_conversation(&turns, &aliases);
        assert!(!ctx.is_follow_up);
    }

    #[test]
    fn empty_turns_yields_default_context() {
        let aliases = AliasTables::default();
        let ctx = analyze_conversation(&[], &aliases);
        assert_eq!(ctx.confidence, 0.0);
        assert!(ctx.areas.is_empty());
    }
}
