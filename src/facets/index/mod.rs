//! Token index: storage of per-record token sequences
//!
//! Writers go through [`FacetIndex`]; readers take an immutable
//! [`IndexSnapshot`] and run `matching` followed by `tally` against it (fused
//! as `facet_counts`), so a query never observes a write that lands between
//! those two steps.

mod memory;
mod tantivy_index;

pub use memory::InMemoryIndex;
pub use tantivy_index::{build_facet_schema, TantivyIndex};

use crate::facets::aggregator::TokenCounts;
use crate::facets::budget::QueryBudget;
use crate::facets::config::{FacetConfig, IndexBackend};
use crate::facets::encoder::{escape, Token, TokenSequence};
use crate::facets::error::FacetResult;
use crate::facets::record::RecordId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Record IDs selected by a containment query
pub type RecordSet = HashSet<RecordId>;

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Backend serving the index
    pub backend: IndexBackend,

    /// Number of live records
    pub total_records: u64,

    /// Number of distinct tokens, when the backend tracks it cheaply
    pub distinct_tokens: Option<u64>,

    /// On-disk size in bytes, for persistent backends
    pub index_size_bytes: Option<u64>,

    /// Number of segments, for segmented backends
    pub num_segments: Option<usize>,

    /// Time of the last applied write
    pub last_commit: Option<DateTime<Utc>>,
}

/// Field names whose tokens a tally must skip
///
/// Stored escaped so membership is tested against a token's raw field
/// without decoding it.
#[derive(Debug, Clone, Default)]
pub struct ExcludedFields {
    escaped: HashSet<String>,
}

impl ExcludedFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            escaped: fields
                .into_iter()
                .map(|field| escape(field.as_ref()).into_owned())
                .collect(),
        }
    }

    pub fn contains_token(&self, token: &Token) -> bool {
        self.escaped.contains(token.raw_field())
    }

    /// Membership test for an unescaped field name
    pub fn contains_field(&self, field: &str) -> bool {
        self.escaped.contains(escape(field).as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.escaped.is_empty()
    }
}

/// Write side of a token index
#[async_trait]
pub trait FacetIndex: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> IndexBackend;

    /// Replace the token sequence stored for `id`
    async fn upsert(&self, id: RecordId, tokens: TokenSequence) -> FacetResult<()>;

    /// Replace many records under a single writer acquisition
    async fn upsert_batch(&self, records: Vec<(RecordId, TokenSequence)>) -> FacetResult<usize>;

    /// Drop every token of `id`; unknown IDs are ignored
    async fn remove(&self, id: RecordId) -> FacetResult<()>;

    /// Drop every record
    async fn clear(&self) -> FacetResult<()>;

    /// Consistent read view of the current state
    fn snapshot(&self) -> FacetResult<Arc<dyn IndexSnapshot>>;

    async fn stats(&self) -> FacetResult<IndexStats>;
}

/// Read side of a token index, frozen at the moment it was taken
pub trait IndexSnapshot: Send + Sync {
    fn record_count(&self) -> u64;

    /// Records whose sequence contains every one of `filter_tokens`
    ///
    /// An empty slice selects every record.
    fn matching(&self, filter_tokens: &[Token], budget: &QueryBudget) -> FacetResult<RecordSet>;

    /// For each token carried by `records` outside `exclude`, how many of
    /// those records carry it
    fn tally(
        &self,
        records: &RecordSet,
        exclude: &ExcludedFields,
        budget: &QueryBudget,
    ) -> FacetResult<TokenCounts>;

    /// Number of records matching `filter_tokens` and the tally over them
    ///
    /// Backends that can count straight off the containment query override
    /// this to skip materializing the ID set.
    fn facet_counts(
        &self,
        filter_tokens: &[Token],
        exclude: &ExcludedFields,
        budget: &QueryBudget,
    ) -> FacetResult<(u64, TokenCounts)> {
        let matched = self.matching(filter_tokens, budget)?;
        let counts = self.tally(&matched, exclude, budget)?;
        Ok((matched.len() as u64, counts))
    }

    /// Token sequence of one record, or `NotFound`
    fn get(&self, id: &RecordId) -> FacetResult<TokenSequence>;
}

/// Create an index based on configuration
pub async fn create_index(config: &FacetConfig) -> FacetResult<Arc<dyn FacetIndex>> {
    config.validate()?;

    match config.backend {
        IndexBackend::Memory => Ok(create_in_memory_index()),
        IndexBackend::Tantivy => {
            tracing::info!(path = ?config.index_path, "Initializing Tantivy facet index");
            let index = TantivyIndex::new(config.index_path.as_deref(), config.writer_heap_size)?;
            Ok(Arc::new(index))
        }
    }
}

/// Create an in-memory index (for testing and development)
pub fn create_in_memory_index() -> Arc<dyn FacetIndex> {
    tracing::info!("Initializing in-memory facet index");
    Arc::new(InMemoryIndex::new())
}
