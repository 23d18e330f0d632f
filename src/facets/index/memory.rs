//! In-memory inverted index with copy-on-write snapshots

use crate::facets::aggregator::TokenCounts;
use crate::facets::budget::QueryBudget;
use crate::facets::config::IndexBackend;
use crate::facets::encoder::{Token, TokenSequence};
use crate::facets::error::{FacetError, FacetResult};
use crate::facets::index::{ExcludedFields, FacetIndex, IndexSnapshot, IndexStats, RecordSet};
use crate::facets::record::RecordId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Number of record partitions
const SHARD_COUNT: usize = 64;

fn shard_of(id: &RecordId) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % SHARD_COUNT as u64) as usize
}

/// One partition of the index, holding a disjoint subset of the records
#[derive(Debug, Clone, Default)]
struct Shard {
    /// Forward index: record -> tokens
    records: HashMap<RecordId, TokenSequence>,
    /// Inverted index over this shard's records: token -> posting set
    postings: HashMap<Token, HashSet<RecordId>>,
}

impl Shard {
    fn insert(&mut self, id: RecordId, tokens: TokenSequence) -> bool {
        let replaced = self.delete(&id);
        for token in &tokens {
            self.postings.entry(token.clone()).or_default().insert(id);
        }
        self.records.insert(id, tokens);
        replaced
    }

    /// Posting sets are dropped as soon as they empty, so deleted tokens
    /// never linger in the inverted index.
    fn delete(&mut self, id: &RecordId) -> bool {
        let Some(tokens) = self.records.remove(id) else {
            return false;
        };
        for token in tokens {
            if let Entry::Occupied(mut posting) = self.postings.entry(token) {
                posting.get_mut().remove(id);
                if posting.get().is_empty() {
                    posting.remove();
                }
            }
        }
        true
    }

    fn matching(
        &self,
        filter_tokens: &[Token],
        budget: &QueryBudget,
        visited: &mut usize,
        matched: &mut RecordSet,
    ) -> FacetResult<()> {
        let mut postings = Vec::with_capacity(filter_tokens.len());
        for token in filter_tokens {
            match self.postings.get(token) {
                Some(posting) => postings.push(posting),
                None => return Ok(()),
            }
        }

        // Drive the intersection from the rarest token
        postings.sort_by_key(|posting| posting.len());
        let Some((smallest, rest)) = postings.split_first() else {
            return Ok(());
        };

        for id in smallest.iter() {
            budget.tick(*visited)?;
            *visited += 1;
            if rest.iter().all(|posting| posting.contains(id)) {
                matched.insert(*id);
            }
        }
        Ok(())
    }
}

/// Immutable view shared between the index and its snapshots
///
/// Shards sit behind their own `Arc`, so copying the state copies pointers
/// and a write then clones only the shards it touches.
#[derive(Debug, Clone)]
struct IndexState {
    shards: Vec<Arc<Shard>>,
    record_count: usize,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Arc::new(Shard::default())).collect(),
            record_count: 0,
        }
    }
}

impl IndexState {
    fn shard(&self, id: &RecordId) -> &Shard {
        &self.shards[shard_of(id)]
    }

    fn shard_mut(&mut self, id: &RecordId) -> &mut Shard {
        Arc::make_mut(&mut self.shards[shard_of(id)])
    }

    fn get(&self, id: &RecordId) -> Option<&TokenSequence> {
        self.shard(id).records.get(id)
    }

    fn insert(&mut self, id: RecordId, tokens: TokenSequence) {
        if !self.shard_mut(&id).insert(id, tokens) {
            self.record_count += 1;
        }
    }

    fn delete(&mut self, id: &RecordId) -> bool {
        let removed = self.shard_mut(id).delete(id);
        if removed {
            self.record_count -= 1;
        }
        removed
    }

    fn distinct_tokens(&self) -> usize {
        let mut tokens = HashSet::new();
        for shard in &self.shards {
            tokens.extend(shard.postings.keys());
        }
        tokens.len()
    }
}

/// In-memory facet index
///
/// Readers clone the current `Arc<IndexState>` under a short read lock.
/// Writers are serialized by `writer`. With no snapshot alive they mutate
/// the state in place; otherwise they build the next state outside the
/// lock, cloning only the touched shards, and swap it in.
pub struct InMemoryIndex {
    state: RwLock<Arc<IndexState>>,
    writer: Mutex<()>,
    last_commit: RwLock<Option<DateTime<Utc>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(IndexState::default())),
            writer: Mutex::new(()),
            last_commit: RwLock::new(None),
        }
    }

    fn touch(&self) {
        *self.last_commit.write() = Some(Utc::now());
    }

    fn current(&self) -> Arc<IndexState> {
        self.state.read().clone()
    }

    /// Applies `apply` to the index state. Callers must hold `writer`.
    fn write_state<R>(&self, apply: impl FnOnce(&mut IndexState) -> R) -> R {
        {
            let mut guard = self.state.write();
            if let Some(state) = Arc::get_mut(&mut *guard) {
                return apply(state);
            }
        }

        let mut next = IndexState::clone(&self.current());
        let result = apply(&mut next);
        *self.state.write() = Arc::new(next);
        result
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FacetIndex for InMemoryIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Memory
    }

    async fn upsert(&self, id: RecordId, tokens: TokenSequence) -> FacetResult<()> {
        {
            let _writer = self.writer.lock();
            // Identical content: skip the write so no shard is copied
            if self.current().get(&id) == Some(&tokens) {
                return Ok(());
            }
            self.write_state(|state| state.insert(id, tokens));
        }
        self.touch();

        tracing::debug!(record_id = %id, "Record indexed");
        Ok(())
    }

    async fn upsert_batch(&self, records: Vec<(RecordId, TokenSequence)>) -> FacetResult<usize> {
        let count = records.len();
        {
            let _writer = self.writer.lock();
            self.write_state(|state| {
                for (id, tokens) in records {
                    state.insert(id, tokens);
                }
            });
        }
        self.touch();

        tracing::debug!(count, "Record batch indexed");
        Ok(count)
    }

    async fn remove(&self, id: RecordId) -> FacetResult<()> {
        let removed = {
            let _writer = self.writer.lock();
            if self.current().get(&id).is_none() {
                false
            } else {
                self.write_state(|state| state.delete(&id))
            }
        };

        if removed {
            self.touch();
            tracing::debug!(record_id = %id, "Record removed");
        }
        Ok(())
    }

    async fn clear(&self) -> FacetResult<()> {
        {
            let _writer = self.writer.lock();
            *self.state.write() = Arc::new(IndexState::default());
        }
        self.touch();
        Ok(())
    }

    fn snapshot(&self) -> FacetResult<Arc<dyn IndexSnapshot>> {
        Ok(Arc::new(MemorySnapshot {
            state: self.current(),
        }))
    }

    async fn stats(&self) -> FacetResult<IndexStats> {
        let state = self.current();
        Ok(IndexStats {
            backend: IndexBackend::Memory,
            total_records: state.record_count as u64,
            distinct_tokens: Some(state.distinct_tokens() as u64),
            index_size_bytes: None,
            num_segments: None,
            last_commit: *self.last_commit.read(),
        })
    }
}

struct MemorySnapshot {
    state: Arc<IndexState>,
}

impl IndexSnapshot for MemorySnapshot {
    fn record_count(&self) -> u64 {
        self.state.record_count as u64
    }

    fn matching(&self, filter_tokens: &[Token], budget: &QueryBudget) -> FacetResult<RecordSet> {
        let mut visited = 0usize;

        if filter_tokens.is_empty() {
            let mut all = RecordSet::with_capacity(self.state.record_count);
            for shard in &self.state.shards {
                for id in shard.records.keys() {
                    budget.tick(visited)?;
                    visited += 1;
                    all.insert(*id);
                }
            }
            return Ok(all);
        }

        let mut matched = RecordSet::new();
        for shard in &self.state.shards {
            shard.matching(filter_tokens, budget, &mut visited, &mut matched)?;
        }
        Ok(matched)
    }

    fn tally(
        &self,
        records: &RecordSet,
        exclude: &ExcludedFields,
        budget: &QueryBudget,
    ) -> FacetResult<TokenCounts> {
        let mut counts = TokenCounts::new();

        for (i, id) in records.iter().enumerate() {
            budget.tick(i)?;
            let Some(tokens) = self.state.get(id) else {
                continue;
            };
            for token in tokens {
                if exclude.contains_token(token) {
                    continue;
                }
                match counts.get_mut(token) {
                    Some(count) => *count += 1,
                    None => {
                        counts.insert(token.clone(), 1);
                    }
                }
            }
        }

        Ok(counts)
    }

    fn get(&self, id: &RecordId) -> FacetResult<TokenSequence> {
        self.state
            .get(id)
            .cloned()
            .ok_or_else(|| FacetError::NotFound(id.to_string()))
    }
}
