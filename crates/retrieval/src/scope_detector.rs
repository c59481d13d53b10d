//! ScopeDetector (spec §4.5)
//!
//! LLM-primary classifier with a rule-based fallback/tie-break. K is a
//! deterministic function of (scope, area_count, domain_count), never
//! left to the LLM to decide.

use std::sync::Arc;
use std::time::Duration;

use ragbridge_config::ScopeRanges;
use ragbridge_core::state::{ConversationContext, ScopeDecision};
use ragbridge_core::traits::LlmClient;
use ragbridge_core::types::{Intent, Scope};

const HOUSE_WIDE_CUES: &[&str] = &["home", "house", "everywhere", "overall", "situation"];
const CONTROL_VERBS: &[&str] = &["turn on", "turn off", "set ", "open ", "close "];

fn range_for(ranges: &ScopeRanges, scope: Scope) -> (usize, usize, usize) {
    let r = match scope {
        Scope::Micro => &ranges.micro,
        Scope::Macro => &ranges.macro_,
        Scope::Overview => &ranges.overview,
    };
    (r.min, r.base, r.max)
}

fn optimal_k(ranges: &ScopeRanges, scope: Scope, area_count: usize, domain_count: usize) -> usize {
    let (min, base, max) = range_for(ranges, scope);
    let raw = base as i64 + 3 * area_count as i64 + 2 * domain_count as i64;
    raw.clamp(min as i64, max as i64) as usize
}

/// Rule-based classifier used as fallback and tie-break (spec §4.5).
fn rule_based_scope(query: &str, context: &ConversationContext) -> (Scope, f32, String) {
    let lower = query.to_lowercase();
    let house_wide = HOUSE_WIDE_CUES.iter().any(|c| lower.contains(c));
    let is_control = CONTROL_VERBS.iter().any(|c| lower.contains(c))
        || context.intent == Some(Intent::Control);

    if house_wide && context.areas.len() <= 1 {
        return (Scope::Overview, 0.7, "rule: house-wide keyword".to_string());
    }
    if context.areas.len() >= 1 && is_control && context.domains.len() <= 1 {
        return (Scope::Micro, 0.7, "rule: single-area control verb".to_string());
    }
    if context.areas.len() >= 1 || context.domains.len() >= 1 {
        return (Scope::Macro, 0.6, "rule: area or domain scoped".to_string());
    }
    (Scope::Micro, 0.4, "rule: default to micro".to_string())
}

fn parse_llm_scope(raw: &str) -> Option<Scope> {
    let normalized = raw.trim().to_lowercase();
    if normalized.contains("overview") {
        Some(Scope::Overview)
    } else if normalized.contains("macro") {
        Some(Scope::Macro)
    } else if normalized.contains("micro") {
        Some(Scope::Micro)
    } else {
        None
    }
}

/// Detect scope and compute K (spec §4.5, §4.9's re-run-on-low-confidence rule).
pub async fn detect_scope(
    rewritten_query: &str,
    context: &ConversationContext,
    ranges: &ScopeRanges,
    llm: Option<&Arc<dyn LlmClient>>,
    timeout: Duration,
) -> ScopeDecision {
    let candidate_count = context.areas.len() + context.domains.len();
    let llm_result = if let Some(llm) = llm {
        let prompt = ragbridge_llm::scope_prompt(rewritten_query, candidate_count);
        match tokio::time::timeout(timeout, llm.complete(&prompt, 8, None, timeout)).await {
            Ok(Ok(text)) => parse_llm_scope(&text).map(|scope| (scope, 0.85, "llm classifier".to_string())),
            _ => None,
        }
    } else {
        None
    };

    let (scope, confidence, reasoning) = match llm_result {
        Some((scope, confidence, reasoning)) if confidence >= 0.5 => (scope, confidence, reasoning),
        Some((llm_scope, llm_confidence, llm_reasoning)) => {
            // Low confidence: re-run with rule-based classifier and pick the
            // higher-confidence result (§4.9).
            let (rule_scope, rule_confidence, rule_reasoning) = rule_based_scope(rewritten_query, context);
            if rule_confidence >= llm_confidence {
                (rule_scope, rule_confidence, rule_reasoning)
            } else {
                (llm_scope, llm_confidence, llm_reasoning)
            }
        }
        None => rule_based_scope(rewritten_query, context),
    };

    let k = optimal_k(ranges, scope, context.areas.len(), context.domains.len());

    ScopeDecision {
        scope,
        confidence,
        optimal_k: k,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> ScopeRanges {
        ScopeRanges::default()
    }

    #[tokio::test]
    async fn no_llm_falls_back_to_rule_based_house_wide() {
        let context = ConversationContext::default();
        let decision = detect_scope("what's the situation at home", &context, &ranges(), None, Duration::from_millis(100)).await;
        assert_eq!(decision.scope, Scope::Overview);
        assert!(decision.optimal_k >= ranges().overview.min);
    }

    #[tokio::test]
    async fn k_equals_min_when_no_areas_or_domains() {
        let context = ConversationContext::default();
        let decision = detect_scope("turn it off", &context, &ranges(), None, Duration::from_millis(100)).await;
        assert_eq!(decision.scope, Scope::Micro);
        assert_eq!(decision.optimal_k, ranges().micro.min);
    }

    #[tokio::test]
    async fn k_increases_with_area_and_domain_counts() {
        let context = ConversationContext {
            areas: vec!["living_room".to_string(), "kitchen".to_string()],
            domains: vec!["light".to_string()],
            ..Default::default()
        };
        let decision = detect_scope("what's on in these rooms", &context, &ranges(), None, Duration::from_millis(100)).await;
        assert!(decision.optimal_k >= ranges().macro_.base);
        assert!(decision.optimal_k <= ranges().macro_.max);
    }

    #[test]
    fn parse_llm_scope_recognizes_all_three_labels() {
        assert_eq!(parse_llm_scope("Scope: micro"), Some(Scope::Micro));
        assert_eq!(parse_llm_scope("macro"), Some(Scope::Macro));
        assert_eq!(parse_llm_scope("overview."), Some(Scope::Overview));
        assert_eq!(parse_llm_scope("unsure"), None);
    }
}
