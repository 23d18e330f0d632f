//! Persistent facet index backed by Tantivy
//!
//! Each record becomes one Tantivy document:
//!
//! - `id`: the record ID, raw string, stored and fast so containment
//!   results map back to IDs without touching the doc store
//! - `token`: every encoded token as a raw (untokenized) term, stored; used
//!   for containment queries
//! - `facet`: every pair as the hierarchical facet `/field/value`; tallies
//!   run through `FacetCollector`
//!
//! Deleted documents are tombstoned at commit and physically reclaimed when
//! segments merge.

use crate::facets::aggregator::TokenCounts;
use crate::facets::budget::QueryBudget;
use crate::facets::config::IndexBackend;
use crate::facets::encoder::{Encoder, Token, TokenSequence};
use crate::facets::error::{FacetError, FacetResult};
use crate::facets::index::{ExcludedFields, FacetIndex, IndexSnapshot, IndexStats, RecordSet};
use crate::facets::record::RecordId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::collector::{Count, DocSetCollector, FacetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery, TermSetQuery};
use tantivy::schema::{
    Facet, FacetOptions, Field, IndexRecordOption, Schema, Value, FAST, STORED, STRING,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tokio::sync::RwLock;

const ID_FIELD: &str = "id";
const TOKEN_FIELD: &str = "token";
const FACET_FIELD: &str = "facet";

/// Build the schema shared by every facet index
pub fn build_facet_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    // Record ID - exact match, columnar for result mapping
    schema_builder.add_text_field(ID_FIELD, STRING | STORED | FAST);

    // Encoded tokens - exact terms for containment queries
    schema_builder.add_text_field(TOKEN_FIELD, STRING | STORED);

    // Field/value pairs as facets for per-field counting
    schema_builder.add_facet_field(FACET_FIELD, FacetOptions::default());

    schema_builder.build()
}

#[derive(Debug, Clone, Copy)]
struct FacetFields {
    id: Field,
    token: Field,
    facet: Field,
}

impl FacetFields {
    fn resolve(schema: &Schema) -> FacetResult<Self> {
        let lookup = |name: &str| {
            schema.get_field(name).map_err(|e| {
                FacetError::IndexInitFailed(format!("Schema is missing field '{}': {}", name, e))
            })
        };
        Ok(Self {
            id: lookup(ID_FIELD)?,
            token: lookup(TOKEN_FIELD)?,
            facet: lookup(FACET_FIELD)?,
        })
    }

    fn id_term(&self, id: &RecordId) -> Term {
        Term::from_field_text(self.id, &id.to_string())
    }

    fn to_document(&self, id: &RecordId, tokens: &TokenSequence) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.id, id.to_string());
        for token in tokens {
            let (field, value) = token.decode();
            doc.add_text(self.token, token.as_str());
            doc.add_facet(self.facet, Facet::from_path(vec![field, value]));
        }
        doc
    }
}

/// Tantivy-backed facet index
pub struct TantivyIndex {
    index: Index,
    fields: FacetFields,
    writer: RwLock<IndexWriter>,
    reader: IndexReader,
    path: Option<PathBuf>,
    last_commit: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl TantivyIndex {
    /// Open or create an index at `path`, or in RAM when `path` is `None`
    pub fn new(path: Option<&Path>, writer_heap_size: usize) -> FacetResult<Self> {
        let index = match path {
            Some(path) => {
                std::fs::create_dir_all(path).map_err(|e| {
                    FacetError::IndexInitFailed(format!("Failed to create index directory: {}", e))
                })?;

                if Self::index_exists(path) {
                    Index::open_in_dir(path).map_err(|e| {
                        FacetError::IndexInitFailed(format!("Failed to open existing index: {}", e))
                    })?
                } else {
                    Index::create_in_dir(path, build_facet_schema()).map_err(|e| {
                        FacetError::IndexInitFailed(format!("Failed to create new index: {}", e))
                    })?
                }
            }
            None => Index::create_in_ram(build_facet_schema()),
        };

        let fields = FacetFields::resolve(&index.schema())?;

        let writer = index
            .writer(writer_heap_size)
            .map_err(|e| FacetError::IndexInitFailed(format!("Failed to create writer: {}", e)))?;

        // Reloaded explicitly after every commit so writes are visible to the
        // next snapshot
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| FacetError::IndexInitFailed(format!("Failed to create reader: {}", e)))?;

        tracing::debug!(path = ?path, "Tantivy facet index ready");

        Ok(Self {
            index,
            fields,
            writer: RwLock::new(writer),
            reader,
            path: path.map(Path::to_path_buf),
            last_commit: parking_lot::RwLock::new(None),
        })
    }

    /// Check if an index exists at the given path
    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn commit(&self, writer: &mut IndexWriter) -> FacetResult<()> {
        writer
            .commit()
            .map_err(|e| FacetError::IndexingFailed(format!("Failed to commit: {}", e)))?;
        self.reader
            .reload()
            .map_err(|e| FacetError::IndexingFailed(format!("Failed to reload reader: {}", e)))?;
        *self.last_commit.write() = Some(Utc::now());
        Ok(())
    }

    fn index_size_bytes(&self) -> Option<u64> {
        let path = self.path.as_ref()?;
        std::fs::read_dir(path).ok().map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
    }
}

#[async_trait]
impl FacetIndex for TantivyIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Tantivy
    }

    async fn upsert(&self, id: RecordId, tokens: TokenSequence) -> FacetResult<()> {
        let doc = self.fields.to_document(&id, &tokens);
        let mut writer = self.writer.write().await;

        writer.delete_term(self.fields.id_term(&id));
        writer
            .add_document(doc)
            .map_err(|e| FacetError::IndexingFailed(format!("Failed to add record {}: {}", id, e)))?;
        self.commit(&mut writer)?;

        tracing::debug!(record_id = %id, "Record indexed");
        Ok(())
    }

    async fn upsert_batch(&self, records: Vec<(RecordId, TokenSequence)>) -> FacetResult<usize> {
        let mut writer = self.writer.write().await;
        let mut indexed = 0;

        for (id, tokens) in &records {
            writer.delete_term(self.fields.id_term(id));
            writer
                .add_document(self.fields.to_document(id, tokens))
                .map_err(|e| {
                    FacetError::IndexingFailed(format!("Failed to add record {}: {}", id, e))
                })?;
            indexed += 1;
        }

        self.commit(&mut writer)?;

        tracing::debug!(count = indexed, "Record batch indexed");
        Ok(indexed)
    }

    async fn remove(&self, id: RecordId) -> FacetResult<()> {
        let mut writer = self.writer.write().await;
        writer.delete_term(self.fields.id_term(&id));
        self.commit(&mut writer)?;

        tracing::debug!(record_id = %id, "Record removed");
        Ok(())
    }

    async fn clear(&self) -> FacetResult<()> {
        let mut writer = self.writer.write().await;
        writer
            .delete_all_documents()
            .map_err(|e| FacetError::IndexingFailed(format!("Failed to clear index: {}", e)))?;
        self.commit(&mut writer)
    }

    fn snapshot(&self) -> FacetResult<Arc<dyn IndexSnapshot>> {
        Ok(Arc::new(TantivySnapshot {
            searcher: self.reader.searcher(),
            fields: self.fields,
        }))
    }

    async fn stats(&self) -> FacetResult<IndexStats> {
        let searcher = self.reader.searcher();

        Ok(IndexStats {
            backend: IndexBackend::Tantivy,
            total_records: searcher.num_docs(),
            distinct_tokens: None,
            index_size_bytes: self.index_size_bytes(),
            num_segments: Some(searcher.segment_readers().len()),
            last_commit: *self.last_commit.read(),
        })
    }
}

/// Group field names so that no group holds two names where one starts with
/// the other; `FacetCollector` rejects facets related by prefix.
fn prefix_free_batches(fields: Vec<String>) -> Vec<Vec<String>> {
    let mut batches: Vec<Vec<String>> = Vec::new();
    for field in fields {
        let slot = batches.iter_mut().find(|batch| {
            batch
                .iter()
                .all(|other| !other.starts_with(field.as_str()) && !field.starts_with(other.as_str()))
        });
        match slot {
            Some(batch) => batch.push(field),
            None => batches.push(vec![field]),
        }
    }
    batches
}

struct TantivySnapshot {
    searcher: Searcher,
    fields: FacetFields,
}

impl TantivySnapshot {
    fn containment_query(&self, filter_tokens: &[Token]) -> Box<dyn Query> {
        if filter_tokens.is_empty() {
            return Box::new(AllQuery);
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = filter_tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(self.fields.token, token.as_str());
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Must, query)
            })
            .collect();

        Box::new(BooleanQuery::new(clauses))
    }

    /// Per-field value counts over the documents selected by `query`
    ///
    /// Runs one pass to discover the fields present, then one pass per
    /// prefix-free batch of kept fields. Returns the number of documents
    /// selected alongside the counts.
    fn facet_tally(
        &self,
        query: &dyn Query,
        exclude: &ExcludedFields,
        budget: &QueryBudget,
    ) -> FacetResult<(u64, TokenCounts)> {
        budget.check()?;

        let mut field_collector = FacetCollector::for_field(FACET_FIELD);
        field_collector.add_facet(Facet::root());
        let (total, field_counts) = self.searcher.search(query, &(Count, field_collector))?;

        let fields: Vec<String> = field_counts
            .get(Facet::root())
            .filter_map(|(facet, _)| match facet.to_path().as_slice() {
                [field] if !exclude.contains_field(field) => Some(field.to_string()),
                _ => None,
            })
            .collect();

        // Values were length-checked at ingest; limits may have changed since
        let encoder = Encoder::new(usize::MAX, usize::MAX);
        let mut counts = TokenCounts::new();

        for batch in prefix_free_batches(fields) {
            budget.check()?;

            let mut value_collector = FacetCollector::for_field(FACET_FIELD);
            for field in &batch {
                value_collector.add_facet(Facet::from_path(vec![field.as_str()]));
            }
            let value_counts = self.searcher.search(query, &value_collector)?;

            for field in &batch {
                let facets = value_counts.get(Facet::from_path(vec![field.as_str()]));
                for (i, (facet, count)) in facets.enumerate() {
                    budget.tick(i)?;
                    if let [field, value] = facet.to_path().as_slice() {
                        counts.insert(encoder.encode_str(field, value)?, count);
                    }
                }
            }
        }

        Ok((total as u64, counts))
    }
}

impl IndexSnapshot for TantivySnapshot {
    fn record_count(&self) -> u64 {
        self.searcher.num_docs()
    }

    fn matching(&self, filter_tokens: &[Token], budget: &QueryBudget) -> FacetResult<RecordSet> {
        budget.check()?;
        let query = self.containment_query(filter_tokens);
        let addresses = self.searcher.search(&*query, &DocSetCollector)?;

        let columns = self
            .searcher
            .segment_readers()
            .iter()
            .map(|reader| reader.fast_fields().str(ID_FIELD))
            .collect::<tantivy::Result<Vec<_>>>()?;

        let mut matched = RecordSet::with_capacity(addresses.len());
        let mut id = String::new();
        for (i, address) in addresses.into_iter().enumerate() {
            budget.tick(i)?;
            let column = columns[address.segment_ord as usize]
                .as_ref()
                .ok_or_else(|| FacetError::SearchFailed("segment has no id column".to_string()))?;
            let ord = column
                .term_ords(address.doc_id)
                .next()
                .ok_or_else(|| FacetError::SearchFailed("document has no record id".to_string()))?;

            id.clear();
            column.ord_to_str(ord, &mut id)?;
            matched.insert(id.parse()?);
        }
        Ok(matched)
    }

    fn tally(
        &self,
        records: &RecordSet,
        exclude: &ExcludedFields,
        budget: &QueryBudget,
    ) -> FacetResult<TokenCounts> {
        if records.is_empty() {
            return Ok(TokenCounts::new());
        }

        let query = TermSetQuery::new(records.iter().map(|id| self.fields.id_term(id)));
        let (_, counts) = self.facet_tally(&query, exclude, budget)?;
        Ok(counts)
    }

    /// Tallies straight off the containment query, so no ID set is built
    fn facet_counts(
        &self,
        filter_tokens: &[Token],
        exclude: &ExcludedFields,
        budget: &QueryBudget,
    ) -> FacetResult<(u64, TokenCounts)> {
        let query = self.containment_query(filter_tokens);
        self.facet_tally(&*query, exclude, budget)
    }

    fn get(&self, id: &RecordId) -> FacetResult<TokenSequence> {
        let query = TermQuery::new(self.fields.id_term(id), IndexRecordOption::Basic);
        let top_docs = self.searcher.search(&query, &TopDocs::with_limit(1))?;

        let (_, address) = top_docs
            .into_iter()
            .next()
            .ok_or_else(|| FacetError::NotFound(id.to_string()))?;
        let doc: TantivyDocument = self.searcher.doc(address)?;

        doc.get_all(self.fields.token)
            .filter_map(|v| v.as_str())
            .map(Token::parse)
            .collect()
    }
}
