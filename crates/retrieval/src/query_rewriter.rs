//! QueryRewriter (spec §4.3)
//!
//! LLM-primary, deterministic-fallback. Output must never be empty: on
//! disabled/timeout/error the latest user turn is returned verbatim after
//! a best-effort noun-phrase carry from the prior user turn.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use ragbridge_core::state::ConversationContext;
use ragbridge_core::traits::LlmClient;
use ragbridge_core::types::{ConversationTurn, TurnRole};

/// Cache for the LLM rewrite call, keyed by a hash of the prompt plus the
/// last 3 turns (§4.3). Shared across requests; one instance lives on the
/// `Pipeline`.
pub struct RewriteCache {
    entries: Mutex<LruCache<u64, String>>,
}

impl RewriteCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, key: u64) -> Option<String> {
        self.entries.lock().get(&key).cloned()
    }

    fn put(&self, key: u64, value: String) {
        self.entries.lock().put(key, value);
    }
}

fn cache_key(prompt: &str, turns: &[ConversationTurn]) -> u64 {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    for turn in turns.iter().rev().take(3) {
        match turn.role {
            TurnRole::User => 0u8.hash(&mut hasher),
            TurnRole::Assistant => 1u8.hash(&mut hasher),
            TurnRole::System => 2u8.hash(&mut hasher),
        }
        turn.content.hash(&mut hasher);
    }
    hasher.finish()
}

/// Deterministic fallback: concatenate the latest user turn with a short
/// "topic carry" salvaged from the immediately prior user turn.
fn rule_based_rewrite(turns: &[ConversationTurn]) -> String {
    let mut user_turns = turns.iter().filter(|t| t.role == TurnRole::User).rev();
    let Some(latest) = user_turns.next() else {
        return String::new();
    };
    let Some(prior) = user_turns.next() else {
        return latest.content.clone();
    };

    // Salvage the longest word in the prior turn as a crude noun-phrase stand-in.
    let topic = prior
        .content
        .split_whitespace()
        .max_by_key(|w| w.len())
        .unwrap_or("");

    if topic.is_empty() {
        latest.content.clone()
    } else {
        format!("{} {}", latest.content.trim_end_matches('?'), topic)
    }
}

/// Rewrite the latest user turn into a self-contained query (spec §4.3).
///
/// `enabled` and `timeout` come from `ragbridge_config::QueryConfig`; `llm`
/// is `None` when the router decided to skip this stage (confidence < 0.3
/// and single-turn conversation, per §4.9). `cache` short-circuits the LLM
/// call entirely on a hit, keyed by the prompt plus the last 3 turns.
pub async fn rewrite_query(
    turns: &[ConversationTurn],
    context: &ConversationContext,
    llm: Option<&Arc<dyn LlmClient>>,
    enabled: bool,
    timeout: Duration,
    cache: &RewriteCache,
) -> String {
    let fallback = rule_based_rewrite(turns);

    if !enabled || !context.is_follow_up {
        return if fallback.is_empty() {
            turns
                .iter()
                .rev()
                .find(|t| t.role == TurnRole::User)
                .map(|t| t.content.clone())
                .unwrap_or_default()
        } else {
            fallback
        };
    }

    let Some(llm) = llm else {
        return fallback;
    };

    let prompt = ragbridge_llm::rewrite_prompt(turns, &fallback);
    let key = cache_key(&prompt, turns);
    if let Some(cached) = cache.get(key) {
        return cached;
    }

    match tokio::time::timeout(timeout, llm.complete(&prompt, 64, None, timeout)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            let rewritten = text.trim().to_string();
            cache.put(key, rewritten.clone());
            rewritten
        }
        _ => fallback,
    }
}
