//! Grouping and ranking of tally counts

use crate::facets::encoder::Token;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Number of records containing each token
pub type TokenCounts = HashMap<Token, u64>;

/// Ranked values per field, keyed by field name
pub type FacetGroups = BTreeMap<String, Vec<FacetCount>>;

/// One ranked value of a facet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

impl FacetCount {
    pub fn new(value: impl Into<String>, count: u64) -> Self {
        Self {
            value: value.into(),
            count,
        }
    }
}

/// Count descending, then value ascending
///
/// Values are unique within a field, so this order is total.
pub fn facet_order(a: &FacetCount, b: &FacetCount) -> Ordering {
    b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value))
}

/// Groups token counts by field and ranks every group
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    parallel: bool,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Aggregator {
    /// `parallel` ranks each field as its own rayon task
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Full ranking without truncation
    pub fn rank(&self, counts: &TokenCounts) -> FacetGroups {
        self.rank_top_k(counts, None)
    }

    /// Ranking truncated to `top_k` values per field
    pub fn rank_top_k(&self, counts: &TokenCounts, top_k: Option<usize>) -> FacetGroups {
        let mut groups = group_by_field(counts);

        if self.parallel && groups.len() > 1 {
            groups
                .par_iter_mut()
                .for_each(|(_, values)| rank_values(values, top_k));
        } else {
            groups
                .iter_mut()
                .for_each(|(_, values)| rank_values(values, top_k));
        }

        groups
    }

    /// Cuts already ranked groups down to their first `k` values
    pub fn truncate(mut groups: FacetGroups, k: usize) -> FacetGroups {
        for values in groups.values_mut() {
            values.truncate(k);
        }
        groups
    }
}

fn group_by_field(counts: &TokenCounts) -> FacetGroups {
    let mut groups: FacetGroups = BTreeMap::new();
    for (token, &count) in counts {
        let (field, value) = token.decode();
        groups
            .entry(field)
            .or_default()
            .push(FacetCount { value, count });
    }
    groups
}

fn rank_values(values: &mut Vec<FacetCount>, top_k: Option<usize>) {
    if let Some(k) = top_k {
        if k == 0 {
            values.clear();
            return;
        }
        if values.len() > k {
            // Partition so the first k entries are the winners, then order only those
            values.select_nth_unstable_by(k - 1, facet_order);
            values.truncate(k);
        }
    }
    values.sort_unstable_by(facet_order);
}
