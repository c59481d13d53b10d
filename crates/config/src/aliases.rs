//! Language/area/domain alias tables (spec §6.2)
//!
//! Static configuration loaded at startup: `{language -> {canonical ->
//! [aliases]}}` plus `{area_alias -> area_id}` and `{domain_alias ->
//! domain}`. Used by ConversationAnalyzer to recognize areas/domains
//! mentioned in a user turn, and by QueryExpander for its bilingual
//! translation pairs.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// `{canonical -> [aliases]}` for a single language.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainAliases {
    #[serde(default)]
    pub canonical_to_aliases: HashMap<String, Vec<String>>,
}

/// Full alias table set loaded from `settings.aliases_path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasTables {
    /// language -> DomainAliases, e.g. `"en"`, `"hu"`.
    #[serde(default)]
    pub languages: HashMap<String, DomainAliases>,
    /// area alias (any language, lowercased) -> canonical area id.
    #[serde(default)]
    pub area_aliases: HashMap<String, String>,
    /// domain alias -> canonical domain (`sensor`, `light`, `climate`, ...).
    #[serde(default)]
    pub domain_aliases: HashMap<String, String>,
    /// QueryExpander's six fixed semantic categories -> synonym terms,
    /// one list per language (spec §4.4).
    #[serde(default)]
    pub semantic_categories: HashMap<String, HashMap<String, Vec<String>>>,
}

impl AliasTables {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {e}", path.as_ref().display())))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve a lowercased token to a canonical area id, if it matches
    /// any configured alias.
    pub fn resolve_area(&self, token: &str) -> Option<&str> {
        self.area_aliases.get(&token.to_lowercase()).map(|s| s.as_str())
    }

    /// Resolve a lowercased token to a canonical domain, if it matches
    /// any configured alias.
    pub fn resolve_domain(&self, token: &str) -> Option<&str> {
        self.domain_aliases.get(&token.to_lowercase()).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_area_alias_case_insensitively() {
        let mut tables = AliasTables::default();
        tables
            .area_aliases
            .insert("living room".to_string(), "living_room".to_string());

        assert_eq!(tables.resolve_area("Living Room"), Some("living_room"));
        assert_eq!(tables.resolve_area("unknown"), None);
    }

    #[test]
    fn default_tables_resolve_nothing() {
        let tables = AliasTables::default();
        assert!(tables.resolve_area("kitchen").is_none());
        assert!(tables.resolve_domain("light").is_none());
    }
}
