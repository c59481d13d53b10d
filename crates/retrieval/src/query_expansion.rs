//! QueryExpander (spec §4.4)
//!
//! Generates up to `max_variants` query variants from: synonym expansion
//! over six fixed semantic categories (temperature, humidity, light,
//! energy, security, climate), bilingual translation pairs, and light
//! paraphrase templates. The original rewritten query is always variant
//! #1; variants that normalize-equal an earlier one are dropped.

use ragbridge_config::AliasTables;

pub const SEMANTIC_CATEGORIES: &[&str] =
    &["temperature", "humidity", "light", "energy", "security", "climate"];

const PARAPHRASE_TEMPLATES: &[fn(&str) -> Option<String>] = &[
    |q: &str| q.strip_prefix("what about ").map(|rest| format!("tell me about {rest}")),
    |q: &str| q.strip_prefix("how is ").map(|rest| format!("status of {rest}")),
    |q: &str| q.strip_prefix("how's ").map(|rest| format!("status of {rest}")),
];

#[derive(Debug, Clone)]
pub struct ExpandedQuery {
    pub original: String,
    /// Variant #1 is always `original`; later entries are generated.
    pub variants: Vec<String>,
}

fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct QueryExpander {
    aliases: AliasTables,
    max_variants: usize,
}

impl QueryExpander {
    pub fn new(aliases: AliasTables, max_variants: usize) -> Self {
        Self {
            aliases,
            max_variants: max_variants.clamp(1, 8),
        }
    }

    fn synonym_variants(&self, query: &str) -> Vec<String> {
        let mut out = Vec::new();
        let words: Vec<&str> = query.split_whitespace().collect();

        for category in SEMANTIC_CATEGORIES {
            let Some(terms_by_lang) = self.aliases.semantic_categories.get(*category) else {
                continue;
            };
            for terms in terms_by_lang.values() {
                for (i, word) in words.iter().enumerate() {
                    let word_norm = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
                    if !terms.iter().any(|t| t.to_lowercase() == word_norm) {
                        continue;
                    }
                    for synonym in terms {
                        if synonym.to_lowercase() == word_norm {
                            continue;
                        }
                        let mut replaced = words.clone();
                        replaced[i] = synonym.as_str();
                        out.push(replaced.join(" "));
                    }
                }
            }
        }
        out
    }

    fn translation_variants(&self, query: &str) -> Vec<String> {
        let mut out = Vec::new();
        let query_lower = query.to_lowercase();
        for aliases in self.aliases.languages.values() {
            for (canonical, synonyms) in &aliases.canonical_to_aliases {
                if query_lower.contains(&canonical.to_lowercase()) {
                    for alias in synonyms {
                        out.push(query_lower.replace(&canonical.to_lowercase(), alias));
                    }
                }
            }
        }
        out
    }

    fn paraphrase_variants(&self, query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        PARAPHRASE_TEMPLATES
            .iter()
            .filter_map(|template| template(&lower))
            .collect()
    }

    /// Expand `query` into at most `max_variants` distinct (after
    /// normalization) strings, original always first.
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let mut variants = vec![query.to_string()];
        let mut seen = vec![normalize(query)];

        let candidates = self
            .synonym_variants(query)
            .into_iter()
            .chain(self.translation_variants(query))
            .chain(self.paraphrase_variants(query));

        for candidate in candidates {
            if variants.len() >= self.max_variants {
                break;
            }
            let key = normalize(&candidate);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            variants.push(candidate);
        }

        ExpandedQuery {
            original: query.to_string(),
            variants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn aliases_with_temperature_synonyms() -> AliasTables {
        let mut tables = AliasTables::default();
        let mut by_lang = HashMap::new();
        by_lang.insert(
            "en".to_string(),
            vec!["temperature".to_string(), "warmth".to_string(), "heat".to_string()],
        );
        tables.semantic_categories.insert("temperature".to_string(), by_lang);
        tables
    }

    #[test]
    fn original_is_always_variant_one() {
        let expander = QueryExpander::new(AliasTables::default(), 3);
        let expanded = expander.expand("what is the temperature");
        assert_eq!(expanded.variants[0], "what is the temperature");
    }

    #[test]
    fn synonym_expansion_produces_variant() {
        let expander = QueryExpander::new(aliases_with_temperature_synonyms(), 3);
        let expanded = expander.expand("what is the temperature");
        assert!(expanded.variants.iter().any(|v| v.contains("warmth") || v.contains("heat")));
    }

    #[test]
    fn variants_are_capped_at_max() {
        let expander = QueryExpander::new(aliases_with_temperature_synonyms(), 2);
        let expanded = expander.expand("what is the temperature");
        assert!(expanded.variants.len() <= 2);
    }

    #[test]
    fn variants_are_deduplicated_after_normalization() {
        let expander = QueryExpander::new(aliases_with_temperature_synonyms(), 8);
        let expanded = expander.expand("what is the temperature");
        let normalized: Vec<String> = expanded.variants.iter().map(|v| normalize(v)).collect();
        let unique: std::collections::HashSet<&String> = normalized.iter().collect();
        assert_eq!(normalized.len(), unique.len());
    }

    #[test]
    fn paraphrase_template_rewrites_what_about() {
        let expander = QueryExpander::new(AliasTables::default(), 3);
        let expanded = expander.expand("what about the kitchen");
        assert!(expanded.variants.iter().any(|v| v.contains("tell me about")));
    }

    #[test]
    fn max_variants_clamped_to_valid_range() {
        let expander = QueryExpander::new(AliasTables::default(), 20);
        assert_eq!(expander.max_variants, 8);
    }
}
