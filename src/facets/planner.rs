//! Turns a filter into facet counts

use crate::facets::aggregator::{Aggregator, FacetGroups};
use crate::facets::budget::QueryBudget;
use crate::facets::config::FacetConfig;
use crate::facets::encoder::Encoder;
use crate::facets::error::{FacetError, FacetResult};
use crate::facets::index::{ExcludedFields, IndexSnapshot};
use crate::facets::record::Filter;
use serde::{Deserialize, Serialize};

/// Facet counts for one filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetResponse {
    /// Ranked values for every field not constrained by the filter
    pub facets: FacetGroups,

    /// Number of records matching the filter
    pub total_matches: u64,

    /// Top-K actually applied after clamping
    pub top_k: usize,

    /// Execution time in milliseconds
    pub took_ms: u64,
}

/// Plans and runs facet queries against index snapshots
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner {
    encoder: Encoder,
    aggregator: Aggregator,
    max_top_k: usize,
    max_filter_fields: usize,
}

impl QueryPlanner {
    pub fn new(config: &FacetConfig) -> Self {
        Self {
            encoder: Encoder::from_config(config),
            aggregator: Aggregator::new(config.parallel_ranking),
            max_top_k: config.max_top_k,
            max_filter_fields: config.max_filter_fields,
        }
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Reject unusable queries and clamp `top_k`
    pub fn resolve_top_k(&self, filter: &Filter, top_k: usize) -> FacetResult<usize> {
        if top_k == 0 {
            return Err(FacetError::InvalidQuery("top_k must be at least 1".to_string()));
        }
        if filter.len() > self.max_filter_fields {
            return Err(FacetError::InvalidQuery(format!(
                "filter has {} clauses, limit is {}",
                filter.len(),
                self.max_filter_fields
            )));
        }
        Ok(top_k.min(self.max_top_k))
    }

    /// Run the four query steps against one snapshot
    ///
    /// Blocking; call from a blocking-capable context.
    pub fn execute(
        &self,
        snapshot: &dyn IndexSnapshot,
        filter: &Filter,
        top_k: usize,
        budget: &QueryBudget,
    ) -> FacetResult<FacetResponse> {
        let top_k = self.resolve_top_k(filter, top_k)?;
        budget.check()?;

        // 1. filter -> containment tokens
        let filter_tokens = self.encoder.encode_filter(filter)?;

        // 2-3. containment, then tally outside the filtered fields
        let exclude = ExcludedFields::new(filter.fields());
        let (total_matches, counts) = snapshot.facet_counts(&filter_tokens, &exclude, budget)?;
        tracing::trace!(
            filter_tokens = filter_tokens.len(),
            matches = total_matches,
            "Containment and tally finished"
        );

        // 4. group, rank, truncate
        budget.check()?;
        let facets = self.aggregator.rank_top_k(&counts, Some(top_k));
        budget.check()?;

        Ok(FacetResponse {
            facets,
            total_matches,
            top_k,
            took_ms: budget.elapsed().as_millis() as u64,
        })
    }
}
