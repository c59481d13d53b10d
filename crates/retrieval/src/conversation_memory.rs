//! ConversationMemory (spec §3, §5)
//!
//! TTL-keyed store of per-session entity recall, read by Reranker's
//! memory-boost factor (f6) and written once at end-of-request. Backed by
//! `DashMap` for per-key locking rather than a single global mutex, since
//! reads (Reranker) and writes (end-of-request, AsyncEnricher) both happen
//! on the hot path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use ragbridge_core::types::{ConversationMemoryEntry, EntityMemory};

pub struct ConversationMemory {
    entries: DashMap<String, ConversationMemoryEntry>,
    ttl: chrono::Duration,
    max_entries_per_session: usize,
}

impl ConversationMemory {
    pub fn new(ttl_seconds: i64, max_entries_per_session: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::seconds(ttl_seconds),
            max_entries_per_session,
        }
    }

    /// Read a session's entry, sweeping it out first if expired (spec §5's
    /// "opportunistic sweep on each read of an absent key" — here extended
    /// to any expired key, since an expired entry is functionally absent).
    pub fn get(&self, session_id: &str) -> Option<ConversationMemoryEntry> {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(session_id) {
            if entry.is_expired(self.ttl, now) {
                drop(entry);
                self.entries.remove(session_id);
                return None;
            }
            return Some(entry.clone());
        }
        None
    }

    /// Record the entities surfaced to the user this turn (end-of-request,
    /// after Diagnostics per spec §5).
    pub fn record_turn(&self, session_id: &str, entity_ids: &[String]) {
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationMemoryEntry::new(session_id));

        entry.last_access = now;
        for id in entity_ids {
            entry
                .entities
                .entry(id.clone())
                .and_modify(|m| {
                    m.last_seen = now;
                    m.boost_counter = m.boost_counter.saturating_add(1);
                })
                .or_insert(EntityMemory {
                    last_seen: now,
                    boost_counter: 1,
                });
        }

        if entry.entities.len() > self.max_entries_per_session {
            let mut by_recency: Vec<(String, chrono::DateTime<Utc>)> =
                entry.entities.iter().map(|(id, m)| (id.clone(), m.last_seen)).collect();
            by_recency.sort_by_key(|(_, last_seen)| *last_seen);
            let overflow = entry.entities.len() - self.max_entries_per_session;
            for (id, _) in by_recency.into_iter().take(overflow) {
                entry.entities.remove(&id);
            }
        }
    }

    pub fn set_summary(&self, session_id: &str, summary: String) {
        if let Some(mut entry) = self.entries.get_mut(session_id) {
            entry.summary = Some(summary);
        }
    }

    /// Evict every session whose last access is older than TTL.
    pub fn sweep(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn the periodic sweep tick (spec §5: "periodic tick, default 60s").
pub fn spawn_sweeper(memory: Arc<ConversationMemory>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            memory.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_get_round_trips() {
        let memory = ConversationMemory::new(900, 64);
        memory.record_turn("s1", &["e1".to_string(), "e2".to_string()]);
        let entry = memory.get("s1").unwrap();
        assert_eq!(entry.entities.len(), 2);
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let memory = ConversationMemory::new(-1, 64);
        memory.record_turn("s1", &["e1".to_string()]);
        assert!(memory.get("s1").is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn repeated_entity_increments_boost_counter() {
        let memory = ConversationMemory::new(900, 64);
        memory.record_turn("s1", &["e1".to_string()]);
        memory.record_turn("s1", &["e1".to_string()]);
        let entry = memory.get("s1").unwrap();
        assert_eq!(entry.entities.get("e1").unwrap().boost_counter, 2);
    }

    #[test]
    fn overflow_evicts_oldest_entities_first() {
        let memory = ConversationMemory::new(900, 2);
        memory.record_turn("s1", &["e1".to_string()]);
        std::thread::sleep(Duration::from_millis(5));
        memory.record_turn("s1", &["e2".to_string()]);
        std::thread::sleep(Duration::from_millis(5));
        memory.record_turn("s1", &["e3".to_string()]);

        let entry = memory.get("s1").unwrap();
        assert_eq!(entry.entities.len(), 2);
        assert!(!entry.entities.contains_key("e1"));
    }

    #[tokio::test]
    async fn sweep_removes_expired_sessions() {
        let memory = Arc::new(ConversationMemory::new(-1, 64));
        memory.record_turn("s1", &["e1".to_string()]);
        memory.sweep();
        assert!(memory.is_empty());
    }
}
