//! Text-search half of the document store, via Tantivy BM25 (spec §6.4)
//!
//! Indexes each entity's display text and system text so HybridVectorSearch
//! (§4.6.2) can combine this with the vector-similarity side. Kept as a
//! standalone module since it owns its own Tantivy `Index`/`IndexWriter`
//! lifecycle, separate from the Qdrant client in `document_store`.

use std::path::Path;

use parking_lot::RwLock;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use ragbridge_core::types::Entity;

use crate::error::{Result, RetrievalError};

#[derive(Debug, Clone)]
pub struct SparseIndexConfig {
    /// Index path; `None` keeps the index in RAM (test / dev default).
    pub index_path: Option<String>,
    pub stemming: bool,
    pub language: String,
}

impl Default for SparseIndexConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            stemming: true,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SparseResult {
    pub entity_id: String,
    pub score: f32,
}

pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    id_field: Field,
    display_text_field: Field,
    system_text_field: Field,
    config: SparseIndexConfig,
}

impl SparseIndex {
    pub fn new(config: SparseIndexConfig) -> Result<Self> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("multilingual")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let display_text_field = schema_builder.add_text_field("display_text", text_options.clone());
        let system_text_field = schema_builder.add_text_field("system_text", text_options);
        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema.clone())
                .map_err(|e| RetrievalError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema.clone())
        };

        index.tokenizers().register("multilingual", Self::build_tokenizer(&config));

        let reader = index.reader().map_err(|e| RetrievalError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            id_field,
            display_text_field,
            system_text_field,
            config,
        })
    }

    fn build_tokenizer(config: &SparseIndexConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming && config.language == "en" {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    pub fn index_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| RetrievalError::Index("writer not available".to_string()))?;

        for entity in entities {
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &entity.id);
            doc.add_text(self.display_text_field, &entity.display_text);
            doc.add_text(self.system_text_field, &entity.system_text);
            writer.add_document(doc).map_err(|e| RetrievalError::Index(e.to_string()))?;
        }

        writer.commit().map_err(|e| RetrievalError::Index(e.to_string()))?;
        self.reader.reload().map_err(|e| RetrievalError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 text search over display+system text, raw (un-normalized) scores.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SparseResult>> {
        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.display_text_field, self.system_text_field]);

        let parsed = query_parser
            .parse_query(query)
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k))
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RetrievalError::Search(e.to_string()))?;

            let entity_id = doc
                .get_first(self.id_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or("")
                .to_string();

            results.push(SparseResult { entity_id, score });
        }

        Ok(results)
    }

    pub fn delete(&self, ids: &[String]) -> Result<()> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| RetrievalError::Index("writer not available".to_string()))?;

        for id in ids {
            writer.delete_term(tantivy::Term::from_field_text(self.id_field, id));
        }
        writer.commit().map_err(|e| RetrievalError::Index(e.to_string()))?;
        self.reader.reload().map_err(|e| RetrievalError::Index(e.to_string()))?;
        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragbridge_core::types::EmbeddingVector;
    use std::collections::HashMap;

    fn entity(id: &str, display: &str, system: &str) -> Entity {
        Entity {
            id: id.to_string(),
            domain: "sensor".to_string(),
            area_id: None,
            area_name: None,
            device_id: None,
            device_name: None,
            friendly_name: display.to_string(),
            device_class: None,
            state: None,
            unit: None,
            last_updated: Some(Utc::now()),
            display_text: display.to_string(),
            system_text: system.to_string(),
            embedding: EmbeddingVector(vec![]),
            content_hash: "h".to_string(),
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn empty_index_has_zero_docs() {
        let index = SparseIndex::new(SparseIndexConfig::default()).unwrap();
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn indexes_and_finds_entity_by_text() {
        let index = SparseIndex::new(SparseIndexConfig::default()).unwrap();
        let entities = vec![
            entity("sensor.living_room_temp", "Living Room Temperature", "living room temperature sensor"),
            entity("light.kitchen", "Kitchen Light", "kitchen light"),
        ];
        index.index_entities(&entities).unwrap();
        assert_eq!(index.doc_count(), 2);

        let results = index.search("living room temperature", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].entity_id, "sensor.living_room_temp");
    }

    #[test]
    fn delete_removes_from_index() {
        let index = SparseIndex::new(SparseIndexConfig::default()).unwrap();
        let entities = vec![entity("light.kitchen", "Kitchen Light", "kitchen light")];
        index.index_entities(&entities).unwrap();
        index.delete(&["light.kitchen".to_string()]).unwrap();
        assert_eq!(index.doc_count(), 0);
    }
}
