//! ContextFormatter (spec §4.8)
//!
//! Picks one of four output shapes from (scope, primary area count,
//! candidate count), then renders a char-budgeted block, truncating only
//! at block boundaries.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use ragbridge_core::state::CandidateEntity;
use ragbridge_core::types::{Entity, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Tldr,
    GroupedByArea,
    Detailed,
    Compact,
}

#[derive(Debug, Clone)]
pub struct FormattedContext {
    pub shape: Shape,
    pub text: String,
    pub truncated: bool,
}

fn choose_shape(scope: Scope, primary_area_count: usize, k: usize) -> Shape {
    if scope == Scope::Overview && k >= 30 {
        Shape::Tldr
    } else if scope == Scope::Macro && primary_area_count >= 2 {
        Shape::GroupedByArea
    } else if scope == Scope::Micro && k <= 5 {
        Shape::Detailed
    } else {
        Shape::Compact
    }
}

/// English system name is preferred where a translation exists (§4.8);
/// `friendly_name` (often localized) is the fallback.
fn entity_label(entity: &Entity) -> &str {
    if entity.system_text.trim().is_empty() {
        &entity.friendly_name
    } else {
        &entity.system_text
    }
}

fn state_fragment(entity: &Entity) -> String {
    match (&entity.state, &entity.unit) {
        (Some(state), Some(unit)) => format!("{state} {unit}"),
        (Some(state), None) => state.clone(),
        _ => "unknown".to_string(),
    }
}

fn render_detailed_block(entity: &Entity) -> String {
    let mut block = format!("- {} ({})\n  state: {}", entity_label(entity), entity.id, state_fragment(entity));
    if !entity.attributes.is_empty() {
        let mut attrs: Vec<(&String, &String)> = entity.attributes.iter().collect();
        attrs.sort_by_key(|(k, _)| k.clone());
        for (key, value) in attrs {
            let _ = write!(block, "\n  {key}: {value}");
        }
    }
    block
}

fn render_compact_block(entity: &Entity) -> String {
    format!("- {} ({}): {}", entity_label(entity), entity.id, state_fragment(entity))
}

fn render_tldr(entities: &[&Entity]) -> Vec<String> {
    let mut by_area: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
    for entity in entities {
        by_area
            .entry(entity.area_name.clone().unwrap_or_else(|| "unassigned".to_string()))
            .or_default()
            .push(entity);
    }
    by_area
        .into_iter()
        .map(|(area, members)| {
            let summary = members.iter().map(|e| state_fragment(e)).collect::<Vec<_>>().join(", ");
            format!("- {area}: {} entities ({summary})", members.len())
        })
        .collect()
}

fn render_grouped_by_area(entities: &[&Entity]) -> Vec<String> {
    let mut by_area: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
    for entity in entities {
        by_area
            .entry(entity.area_name.clone().unwrap_or_else(|| "unassigned".to_string()))
            .or_default()
            .push(entity);
    }
    by_area
        .into_iter()
        .map(|(area, members)| {
            let mut block = format!("{area}:");
            for entity in members {
                let _ = write!(block, "\n  {}", render_compact_block(entity));
            }
            block
        })
        .collect()
}

/// Truncate a stable-ordered list of blocks to a char budget without
/// splitting any individual block (spec §4.8).
fn assemble(blocks: Vec<String>, max_chars: usize, hard_cap_chars: usize) -> (String, bool) {
    let mut out = String::new();
    let mut truncated = false;
    for block in blocks {
        let candidate_len = out.len() + block.len() + 1;
        if candidate_len > hard_cap_chars {
            truncated = true;
            break;
        }
        if !out.is_empty() && candidate_len > max_chars {
            truncated = true;
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&block);
    }
    (out, truncated)
}

/// Render reranked candidates into the final context string (spec §4.8).
///
/// `entities` must already be resolved for every id in `reranked`
/// (entities missing from the lookup are silently skipped — the Reranker
/// never emits an id the document store didn't return).
pub fn format_context(
    reranked: &[CandidateEntity],
    entities: &[Entity],
    scope: Scope,
    max_chars: usize,
    hard_cap_chars: usize,
) -> FormattedContext {
    let by_id: std::collections::HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut ordered: Vec<&Entity> = reranked
        .iter()
        .filter_map(|c| by_id.get(c.entity_id.as_str()).copied())
        .collect();
    ordered.sort_by_key(|e| e.id.clone());
    // restore primary-rank ascending (the order reranked already encodes),
    // falling back to id only as a tie-break within equal rank.
    let rank_of: std::collections::HashMap<&str, usize> =
        reranked.iter().enumerate().map(|(i, c)| (c.entity_id.as_str(), i)).collect();
    ordered.sort_by(|a, b| {
        rank_of
            .get(a.id.as_str())
            .cmp(&rank_of.get(b.id.as_str()))
            .then_with(|| a.id.cmp(&b.id))
    });

    let k = ordered.len();
    let primary_count = std::cmp::min(4, k);
    let primary: Vec<&Entity> = ordered.iter().take(primary_count).copied().collect();
    let related: Vec<&Entity> = ordered.iter().skip(primary_count).take(6).copied().collect();

    let primary_area_count = primary
        .iter()
        .filter_map(|e| e.area_id.clone())
        .collect::<std::collections::HashSet<_>>()
        .len();

    let shape = choose_shape(scope, primary_area_count, k);

    let blocks: Vec<String> = match shape {
        Shape::Tldr => render_tldr(&ordered),
        Shape::GroupedByArea => render_grouped_by_area(&ordered),
        Shape::Detailed => primary.iter().map(|e| render_detailed_block(e)).collect(),
        Shape::Compact => {
            let mut blocks: Vec<String> = primary.iter().map(|e| render_compact_block(e)).collect();
            blocks.extend(related.iter().map(|e| render_compact_block(e)));
            blocks
        }
    };

    let (text, truncated) = assemble(blocks, max_chars, hard_cap_chars);

    FormattedContext { shape, text, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn entity(id: &str, area: &str, state: &str) -> Entity {
        Entity {
            id: id.to_string(),
            domain: "sensor".to_string(),
            area_id: Some(area.to_string()),
            area_name: Some(area.to_string()),
            device_id: None,
            device_name: None,
            friendly_name: id.to_string(),
            device_class: None,
            state: Some(state.to_string()),
            unit: None,
            last_updated: Some(Utc::now()),
            display_text: id.to_string(),
            system_text: id.to_string(),
            embedding: ragbridge_core::types::EmbeddingVector(vec![]),
            content_hash: "h".to_string(),
            attributes: HashMap::new(),
        }
    }

    fn candidate(id: &str) -> CandidateEntity {
        CandidateEntity {
            entity_id: id.to_string(),
            cluster_score: None,
            vector_score: Some(0.5),
            text_score: None,
            rerank_score: Some(0.5),
            factors: None,
        }
    }

    #[test]
    fn overview_with_large_k_chooses_tldr() {
        let entities: Vec<Entity> = (0..30).map(|i| entity(&format!("e{i}"), "kitchen", "on")).collect();
        let reranked: Vec<CandidateEntity> = entities.iter().map(|e| candidate(&e.id)).collect();
        let out = format_context(&reranked, &entities, Scope::Overview, 4096, 8192);
        assert_eq!(out.shape, Shape::Tldr);
    }

    #[test]
    fn micro_with_few_entities_chooses_detailed() {
        let entities = vec![entity("e1", "kitchen", "on"), entity("e2", "kitchen", "off")];
        let reranked: Vec<CandidateEntity> = entities.iter().map(|e| candidate(&e.id)).collect();
        let out = format_context(&reranked, &entities, Scope::Micro, 4096, 8192);
        assert_eq!(out.shape, Shape::Detailed);
    }

    #[test]
    fn macro_with_multiple_areas_chooses_grouped() {
        let entities = vec![entity("e1", "kitchen", "on"), entity("e2", "living_room", "off")];
        let reranked: Vec<CandidateEntity> = entities.iter().map(|e| candidate(&e.id)).collect();
        let out = format_context(&reranked, &entities, Scope::Macro, 4096, 8192);
        assert_eq!(out.shape, Shape::GroupedByArea);
    }

    #[test]
    fn truncation_happens_at_block_boundary() {
        let entities: Vec<Entity> = (0..20).map(|i| entity(&format!("e{i}"), "kitchen", "on")).collect();
        let reranked: Vec<CandidateEntity> = entities.iter().map(|e| candidate(&e.id)).collect();
        let out = format_context(&reranked, &entities, Scope::Micro, 50, 200);
        assert!(out.truncated);
        assert!(out.text.len() <= 200);
        assert!(!out.text.ends_with(','));
    }
}
