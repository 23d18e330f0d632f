//! Main facet service implementation

use crate::facets::budget::QueryBudget;
use crate::facets::config::FacetConfig;
use crate::facets::error::{FacetError, FacetResult};
use crate::facets::index::{create_index, FacetIndex, IndexStats};
use crate::facets::planner::{FacetResponse, QueryPlanner};
use crate::facets::record::{FieldValue, Filter, Record, RecordId};
use crate::metrics::{
    INDEXED_RECORDS, QUERIES_TOTAL, QUERY_DURATION_SECONDS, RECORDS_DELETED_TOTAL,
    RECORDS_INGESTED_TOTAL,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Facet service: write path and query path over one index
pub struct FacetService {
    /// Token index
    index: Arc<dyn FacetIndex>,

    /// Query planner
    planner: QueryPlanner,

    /// Configuration
    config: FacetConfig,
}

impl FacetService {
    /// Create a new facet service with the configured backend
    pub async fn new(config: FacetConfig) -> FacetResult<Self> {
        let index = create_index(&config).await?;
        Ok(Self::with_index(index, config))
    }

    /// Wrap an existing index
    pub fn with_index(index: Arc<dyn FacetIndex>, config: FacetConfig) -> Self {
        Self {
            planner: QueryPlanner::new(&config),
            index,
            config,
        }
    }

    pub fn config(&self) -> &FacetConfig {
        &self.config
    }

    /// Index (or re-index) one record's metadata
    pub async fn ingest(
        &self,
        id: RecordId,
        fields: &BTreeMap<String, FieldValue>,
    ) -> FacetResult<()> {
        let tokens = self.planner.encoder().encode_record(fields)?;
        let token_count = tokens.len();

        self.index.upsert(id, tokens).await?;

        RECORDS_INGESTED_TOTAL.inc();
        self.refresh_gauge();
        tracing::debug!(record_id = %id, tokens = token_count, "Record ingested");
        Ok(())
    }

    pub async fn ingest_record(&self, record: &Record) -> FacetResult<()> {
        self.ingest(record.id, &record.fields).await
    }

    /// Index many records with a single commit
    ///
    /// Every record is encoded before anything is written, so one bad
    /// record rejects the whole batch.
    pub async fn ingest_batch(&self, records: &[Record]) -> FacetResult<usize> {
        let encoder = self.planner.encoder();
        let encoded = records
            .iter()
            .map(|record| Ok((record.id, encoder.encode_record(&record.fields)?)))
            .collect::<FacetResult<Vec<_>>>()?;

        let indexed = self.index.upsert_batch(encoded).await?;

        RECORDS_INGESTED_TOTAL.inc_by(indexed as f64);
        self.refresh_gauge();
        tracing::info!(count = indexed, "Record batch ingested");
        Ok(indexed)
    }

    /// Remove a record; unknown IDs are not an error
    pub async fn delete(&self, id: RecordId) -> FacetResult<()> {
        self.index.remove(id).await?;

        RECORDS_DELETED_TOTAL.inc();
        self.refresh_gauge();
        tracing::debug!(record_id = %id, "Record deleted");
        Ok(())
    }

    /// Look a record up by ID
    ///
    /// Values come back in their canonical string form.
    pub async fn get_record(&self, id: RecordId) -> FacetResult<Record> {
        let tokens = self.index.snapshot()?.get(&id)?;
        let fields = tokens
            .decode_all()
            .into_iter()
            .map(|(field, value)| (field, FieldValue::String(value)))
            .collect();
        Ok(Record { id, fields })
    }

    /// Facet counts for `filter`, using the configured deadline
    pub async fn search(&self, filter: &Filter, top_k: Option<usize>) -> FacetResult<FacetResponse> {
        let budget = QueryBudget::from_timeout(self.config.query_timeout());
        self.search_with_budget(filter, top_k, budget).await
    }

    /// Facet counts for `filter` under an explicit budget
    ///
    /// On expiry the budget's cancellation handle is tripped so the blocking
    /// work stops, and `Timeout` is returned instead of a partial result.
    pub async fn search_with_budget(
        &self,
        filter: &Filter,
        top_k: Option<usize>,
        budget: QueryBudget,
    ) -> FacetResult<FacetResponse> {
        let timer = QUERY_DURATION_SECONDS.start_timer();
        let result = self.run_query(filter, top_k, budget).await;
        timer.observe_duration();

        match &result {
            Ok(response) => {
                QUERIES_TOTAL.with_label_values(&["ok"]).inc();
                tracing::debug!(
                    filter_clauses = filter.len(),
                    total_matches = response.total_matches,
                    facets = response.facets.len(),
                    took_ms = response.took_ms,
                    "Facet query completed"
                );
            }
            Err(e) => {
                QUERIES_TOTAL.with_label_values(&[e.kind()]).inc();
                if e.is_timeout() {
                    tracing::warn!(filter_clauses = filter.len(), error = %e, "Facet query timed out");
                } else {
                    tracing::debug!(filter_clauses = filter.len(), error = %e, "Facet query failed");
                }
            }
        }

        result
    }

    async fn run_query(
        &self,
        filter: &Filter,
        top_k: Option<usize>,
        budget: QueryBudget,
    ) -> FacetResult<FacetResponse> {
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        // Fail fast on bad input before spawning
        self.planner.resolve_top_k(filter, top_k)?;

        let snapshot = self.index.snapshot()?;
        let planner = self.planner;
        let task_filter = filter.clone();
        let task_budget = budget.clone();

        let task = tokio::task::spawn_blocking(move || {
            planner.execute(snapshot.as_ref(), &task_filter, top_k, &task_budget)
        });

        let joined = match budget.remaining() {
            Some(remaining) => match tokio::time::timeout(remaining, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    budget.cancellation().cancel();
                    return Err(FacetError::Timeout {
                        elapsed_ms: budget.elapsed().as_millis() as u64,
                    });
                }
            },
            None => task.await,
        };

        let result =
            joined.map_err(|e| FacetError::SearchFailed(format!("Query task failed: {}", e)))?;
        // The task may notice the deadline before the timer fires
        if matches!(result, Err(FacetError::Timeout { .. })) {
            budget.cancellation().cancel();
        }
        result
    }

    /// Get index statistics
    pub async fn get_stats(&self) -> FacetResult<IndexStats> {
        let stats = self.index.stats().await?;
        INDEXED_RECORDS.set(stats.total_records as f64);
        Ok(stats)
    }

    /// Remove every record
    pub async fn clear_index(&self) -> FacetResult<()> {
        self.index.clear().await?;
        self.refresh_gauge();
        tracing::info!("Facet index cleared");
        Ok(())
    }

    /// Replace the whole index content with `records`
    pub async fn rebuild_index(&self, records: &[Record]) -> FacetResult<usize> {
        self.clear_index().await?;
        self.ingest_batch(records).await
    }

    fn refresh_gauge(&self) {
        if let Ok(snapshot) = self.index.snapshot() {
            INDEXED_RECORDS.set(snapshot.record_count() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facets::aggregator::FacetCount;
    use crate::facets::budget::CancellationHandle;
    use std::time::Duration;

    async fn create_test_service() -> FacetService {
        FacetService::new(FacetConfig::default()).await.unwrap()
    }

    fn listing(state: &str, seller: &str) -> Record {
        Record::new(RecordId::new())
            .with_field("state", state)
            .with_field("seller", seller)
    }

    #[tokio::test]
    async fn test_service_creation() {
        let service = create_test_service().await;
        let stats = service.get_stats().await.unwrap();
        assert_eq!(stats.total_records, 0);
    }

    #[tokio::test]
    async fn test_ingest_and_search() {
        let service = create_test_service().await;
        let records = vec![
            listing("CA", "agent"),
            listing("CA", "owner"),
            listing("TX", "agent"),
        ];
        assert_eq!(service.ingest_batch(&records).await.unwrap(), 3);

        let response = service
            .search(&Filter::new().with("state", "CA"), None)
            .await
            .unwrap();

        assert_eq!(response.top_k, 50);
        assert_eq!(
            response.facets["seller"],
            vec![FacetCount::new("agent", 1), FacetCount::new("owner", 1)]
        );
    }

    #[tokio::test]
    async fn test_get_record_round_trip() {
        let service = create_test_service().await;
        let record = Record::new(RecordId::new())
            .with_field("state", "CA")
            .with_field("beds", 3i64)
            .with_field("pool", true);
        service.ingest_record(&record).await.unwrap();

        let fetched = service.get_record(record.id).await.unwrap();
        assert_eq!(fetched.fields["state"], FieldValue::from("CA"));
        assert_eq!(fetched.fields["beds"], FieldValue::from("3"));
        assert_eq!(fetched.fields["pool"], FieldValue::from("true"));

        let missing = service.get_record(RecordId::new()).await;
        assert!(matches!(missing, Err(FacetError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_batch_with_bad_record_writes_nothing() {
        let service = create_test_service().await;
        let records = vec![
            listing("CA", "agent"),
            Record::new(RecordId::new()).with_field("state", "bad\u{0}value"),
        ];

        let result = service.ingest_batch(&records).await;
        assert!(matches!(result, Err(FacetError::Encoding(_))));
        assert_eq!(service.get_stats().await.unwrap().total_records, 0);
    }

    #[tokio::test]
    async fn test_expired_budget_returns_timeout() {
        let service = create_test_service().await;
        service.ingest_record(&listing("CA", "agent")).await.unwrap();

        let budget = QueryBudget::with_timeout(Duration::ZERO);
        let result = service.search_with_budget(&Filter::new(), Some(5), budget).await;
        assert!(matches!(result, Err(FacetError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let service = create_test_service().await;
        service.ingest_record(&listing("CA", "agent")).await.unwrap();

        let handle = CancellationHandle::new();
        handle.cancel();
        let budget = QueryBudget::unbounded().with_cancellation(handle);
        let result = service.search_with_budget(&Filter::new(), Some(5), budget).await;
        assert!(matches!(result, Err(FacetError::Cancelled)));
    }

    #[tokio::test]
    async fn test_rebuild_index() {
        let service = create_test_service().await;
        service.ingest_record(&listing("NY", "agent")).await.unwrap();

        let rebuilt = service
            .rebuild_index(&[listing("CA", "owner"), listing("TX", "owner")])
            .await
            .unwrap();
        assert_eq!(rebuilt, 2);

        let response = service.search(&Filter::new(), Some(10)).await.unwrap();
        assert_eq!(response.total_matches, 2);
        assert_eq!(response.facets["seller"], vec![FacetCount::new("owner", 2)]);
    }
}
