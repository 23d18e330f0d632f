//! Integration tests for the facet engine, run against both index backends

use facet_engine::facets::*;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TEST_HEAP: usize = 15_000_000;

/// Helper to create one service per backend
async fn create_test_services() -> Vec<(IndexBackend, FacetService)> {
    let memory = FacetService::new(FacetConfig::default()).await.unwrap();
    let tantivy = FacetService::new(
        FacetConfigBuilder::new()
            .backend(IndexBackend::Tantivy)
            .writer_heap_size(TEST_HEAP)
            .build(),
    )
    .await
    .unwrap();

    vec![(IndexBackend::Memory, memory), (IndexBackend::Tantivy, tantivy)]
}

fn listing(id: RecordId, state: &str, seller: &str) -> Record {
    Record::new(id)
        .with_field("state", state)
        .with_field("seller", seller)
}

/// Deterministic listings spread over a few states, sellers and bedroom counts
fn generated_listings(count: usize) -> Vec<Record> {
    const STATES: [&str; 5] = ["CA", "TX", "NY", "WA", "FL"];
    const SELLERS: [&str; 3] = ["agent", "owner", "bank"];

    (0..count)
        .map(|i| {
            Record::new(RecordId::new())
                .with_field("state", STATES[(i * 7) % STATES.len()])
                .with_field("seller", SELLERS[(i * 5 + i / 3) % SELLERS.len()])
                .with_field("beds", ((i % 4) + 1) as i64)
                .with_field("pool", i % 6 == 0)
        })
        .collect()
}

fn counts(response: &FacetResponse, field: &str) -> Vec<(String, u64)> {
    response
        .facets
        .get(field)
        .map(|values| values.iter().map(|c| (c.value.clone(), c.count)).collect())
        .unwrap_or_default()
}

fn pairs(expected: &[(&str, u64)]) -> Vec<(String, u64)> {
    expected.iter().map(|(v, c)| (v.to_string(), *c)).collect()
}

#[tokio::test]
async fn test_listing_scenarios() {
    for (backend, service) in create_test_services().await {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        let id3 = RecordId::new();
        service
            .ingest_batch(&[
                listing(id1, "CA", "agent"),
                listing(id2, "CA", "owner"),
                listing(id3, "TX", "agent"),
            ])
            .await
            .unwrap();

        let ca = Filter::new().with("state", "CA");
        let response = service.search(&ca, Some(10)).await.unwrap();
        assert_eq!(
            counts(&response, "seller"),
            pairs(&[("agent", 1), ("owner", 1)]),
            "{}",
            backend
        );
        assert!(!response.facets.contains_key("state"), "{}", backend);

        let response = service.search(&Filter::new(), Some(1)).await.unwrap();
        assert_eq!(counts(&response, "state"), pairs(&[("CA", 2)]), "{}", backend);
        assert_eq!(counts(&response, "seller"), pairs(&[("agent", 2)]), "{}", backend);

        service.delete(id2).await.unwrap();
        let response = service.search(&ca, Some(10)).await.unwrap();
        assert_eq!(counts(&response, "seller"), pairs(&[("agent", 1)]), "{}", backend);
        assert_eq!(response.total_matches, 1, "{}", backend);
    }
}

#[tokio::test]
async fn test_reserved_characters_survive_the_round_trip() {
    for (backend, service) in create_test_services().await {
        let id = RecordId::new();
        let record = Record::new(id)
            .with_field("url:host", "example.com:8080")
            .with_field("path", r"C:\temp\x")
            .with_field("kind", "file");
        service.ingest_record(&record).await.unwrap();

        let fetched = service.get_record(id).await.unwrap();
        assert_eq!(fetched.fields["url:host"], FieldValue::from("example.com:8080"), "{}", backend);
        assert_eq!(fetched.fields["path"], FieldValue::from(r"C:\temp\x"), "{}", backend);

        let response = service
            .search(&Filter::new().with("url:host", "example.com:8080"), None)
            .await
            .unwrap();
        assert_eq!(response.total_matches, 1, "{}", backend);
        assert_eq!(counts(&response, "path"), pairs(&[(r"C:\temp\x", 1)]), "{}", backend);
        assert!(!response.facets.contains_key("url:host"), "{}", backend);

        // "url" + "host:example.com:8080" must not collide with the pair above
        let response = service
            .search(&Filter::new().with("url", "host:example.com:8080"), None)
            .await
            .unwrap();
        assert_eq!(response.total_matches, 0, "{}", backend);
    }
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    for (backend, service) in create_test_services().await {
        let records = generated_listings(30);
        service.ingest_batch(&records).await.unwrap();
        let before = service.search(&Filter::new(), Some(100)).await.unwrap();

        service.ingest_batch(&records).await.unwrap();
        for record in &records[..5] {
            service.ingest_record(record).await.unwrap();
        }
        let after = service.search(&Filter::new(), Some(100)).await.unwrap();

        assert_eq!(before.facets, after.facets, "{}", backend);
        assert_eq!(after.total_matches, 30, "{}", backend);
    }
}

#[tokio::test]
async fn test_reingest_replaces_previous_metadata() {
    for (backend, service) in create_test_services().await {
        let id = RecordId::new();
        service.ingest_record(&listing(id, "CA", "agent")).await.unwrap();
        service.ingest_record(&listing(id, "TX", "owner")).await.unwrap();

        let response = service.search(&Filter::new(), None).await.unwrap();
        assert_eq!(response.total_matches, 1, "{}", backend);
        assert_eq!(counts(&response, "state"), pairs(&[("TX", 1)]), "{}", backend);
        assert_eq!(counts(&response, "seller"), pairs(&[("owner", 1)]), "{}", backend);
    }
}

#[tokio::test]
async fn test_adding_a_clause_never_increases_counts() {
    for (backend, service) in create_test_services().await {
        service.ingest_batch(&generated_listings(120)).await.unwrap();

        let broad = service
            .search(&Filter::new().with("state", "CA"), Some(100))
            .await
            .unwrap();
        let narrow = service
            .search(&Filter::new().with("state", "CA").with("seller", "agent"), Some(100))
            .await
            .unwrap();

        assert!(narrow.total_matches <= broad.total_matches, "{}", backend);
        for (field, values) in &narrow.facets {
            for value in values {
                let wider = broad.facets[field]
                    .iter()
                    .find(|c| c.value == value.value)
                    .map(|c| c.count)
                    .unwrap_or(0);
                assert!(value.count <= wider, "{} {}={}", backend, field, value.value);
            }
        }
    }
}

#[tokio::test]
async fn test_ranking_order_and_determinism() {
    for (backend, service) in create_test_services().await {
        service.ingest_batch(&generated_listings(90)).await.unwrap();

        let first = service.search(&Filter::new(), Some(3)).await.unwrap();
        let second = service.search(&Filter::new(), Some(3)).await.unwrap();
        assert_eq!(first.facets, second.facets, "{}", backend);

        for (field, values) in &first.facets {
            assert!(values.len() <= 3, "{} {}", backend, field);
            for pair in values.windows(2) {
                let ordered = pair[0].count > pair[1].count
                    || (pair[0].count == pair[1].count && pair[0].value < pair[1].value);
                assert!(ordered, "{} {}: {:?}", backend, field, pair);
            }
        }
    }
}

#[tokio::test]
async fn test_backends_agree() {
    let records = generated_listings(150);
    let services = create_test_services().await;
    for (_, service) in &services {
        service.ingest_batch(&records).await.unwrap();
    }

    let filters = [
        Filter::new(),
        Filter::new().with("state", "NY"),
        Filter::new().with("beds", 2i64).with("pool", false),
        Filter::new().with("seller", "bank").with("state", "NY"),
    ];

    for filter in &filters {
        let memory = services[0].1.search(filter, Some(10)).await.unwrap();
        let tantivy = services[1].1.search(filter, Some(10)).await.unwrap();
        assert_eq!(memory.total_matches, tantivy.total_matches, "{:?}", filter);
        assert_eq!(memory.facets, tantivy.facets, "{:?}", filter);
    }
}

#[tokio::test]
async fn test_numeric_and_boolean_values_match_their_canonical_form() {
    for (backend, service) in create_test_services().await {
        let id = RecordId::new();
        service
            .ingest_record(&Record::new(id).with_field("beds", 3.0).with_field("pool", true))
            .await
            .unwrap();

        let by_int = service
            .search(&Filter::new().with("beds", 3i64), None)
            .await
            .unwrap();
        assert_eq!(by_int.total_matches, 1, "{}", backend);
        assert_eq!(counts(&by_int, "pool"), pairs(&[("true", 1)]), "{}", backend);

        let by_string = service
            .search(&Filter::new().with("beds", "3"), None)
            .await
            .unwrap();
        assert_eq!(by_string.total_matches, 1, "{}", backend);
    }
}

#[tokio::test]
async fn test_large_integers_stay_distinct() {
    for (backend, service) in create_test_services().await {
        let a = RecordId::new();
        let b = RecordId::new();
        let fields_a: std::collections::BTreeMap<String, FieldValue> =
            serde_json::from_str(r#"{"n": 9007199254740993}"#).unwrap();
        let fields_b: std::collections::BTreeMap<String, FieldValue> =
            serde_json::from_str(r#"{"n": 9007199254740992}"#).unwrap();
        service.ingest(a, &fields_a).await.unwrap();
        service.ingest(b, &fields_b).await.unwrap();

        let all = service.search(&Filter::new(), None).await.unwrap();
        assert_eq!(
            counts(&all, "n"),
            pairs(&[("9007199254740992", 1), ("9007199254740993", 1)]),
            "{}",
            backend
        );

        let filtered = service
            .search(&Filter::new().with("n", 9_007_199_254_740_993i64), None)
            .await
            .unwrap();
        assert_eq!(filtered.total_matches, 1, "{}", backend);

        let fetched = service.get_record(a).await.unwrap();
        assert_eq!(fetched.fields["n"], FieldValue::from("9007199254740993"), "{}", backend);
    }
}

#[tokio::test]
async fn test_delete_unknown_record_is_not_an_error() {
    for (backend, service) in create_test_services().await {
        assert!(service.delete(RecordId::new()).await.is_ok(), "{}", backend);
        let missing = service.get_record(RecordId::new()).await;
        assert!(matches!(missing, Err(FacetError::NotFound(_))), "{}", backend);
    }
}

#[tokio::test]
async fn test_timeout_and_cancellation() {
    for (backend, service) in create_test_services().await {
        service.ingest_batch(&generated_listings(20)).await.unwrap();

        let expired = QueryBudget::with_timeout(Duration::ZERO);
        let result = service.search_with_budget(&Filter::new(), None, expired).await;
        assert!(matches!(result, Err(FacetError::Timeout { .. })), "{}", backend);

        let handle = CancellationHandle::new();
        let budget = QueryBudget::unbounded().with_cancellation(handle.clone());
        handle.cancel();
        let result = service.search_with_budget(&Filter::new(), None, budget).await;
        assert!(matches!(result, Err(FacetError::Cancelled)), "{}", backend);

        // A generous budget still completes
        let budget = QueryBudget::with_timeout(Duration::from_secs(30));
        let result = service.search_with_budget(&Filter::new(), None, budget).await;
        assert!(result.is_ok(), "{}", backend);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_expiring_mid_query_cancels_the_scan() {
    let services = create_test_services().await;
    for ((backend, service), records) in services.into_iter().zip([300_000, 50_000]) {
        service.ingest_batch(&generated_listings(records)).await.unwrap();

        let budget = QueryBudget::with_timeout(Duration::from_millis(1));
        let handle = budget.cancellation();
        let result = service.search_with_budget(&Filter::new(), Some(10), budget).await;

        assert!(
            matches!(result, Err(FacetError::Timeout { .. })),
            "{}: expected a timeout, got {:?}",
            backend,
            result.map(|r| r.total_matches)
        );
        assert!(handle.is_cancelled(), "{}", backend);

        // The service is still usable and sees every record
        let full = service
            .search_with_budget(&Filter::new(), Some(1), QueryBudget::unbounded())
            .await
            .unwrap();
        assert_eq!(full.total_matches, records as u64, "{}", backend);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queries_see_a_consistent_snapshot_during_writes() {
    for (backend, service) in create_test_services().await {
        let service = Arc::new(service);
        service.ingest_batch(&generated_listings(50)).await.unwrap();

        let writer = {
            let service = service.clone();
            tokio::spawn(async move {
                for chunk in generated_listings(100).chunks(10) {
                    service.ingest_batch(chunk).await.unwrap();
                }
            })
        };

        let readers = (0..20).map(|_| {
            let service = service.clone();
            async move { service.search(&Filter::new(), Some(100)).await.unwrap() }
        });

        for response in join_all(readers).await {
            // Every record has exactly one state, so a torn read would show up here
            let state_total: u64 = response.facets["state"].iter().map(|c| c.count).sum();
            assert_eq!(state_total, response.total_matches, "{}", backend);
        }

        writer.await.unwrap();
        let stats = service.get_stats().await.unwrap();
        assert_eq!(stats.total_records, 150, "{}", backend);
    }
}

#[tokio::test]
async fn test_tantivy_index_persists_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let config = FacetConfigBuilder::new()
        .backend(IndexBackend::Tantivy)
        .index_path(temp_dir.path().to_path_buf())
        .writer_heap_size(TEST_HEAP)
        .build();

    let id = RecordId::new();
    {
        let service = FacetService::new(config.clone()).await.unwrap();
        service
            .ingest_batch(&[listing(id, "CA", "agent"), listing(RecordId::new(), "TX", "owner")])
            .await
            .unwrap();
    }

    let service = FacetService::new(config).await.unwrap();
    let stats = service.get_stats().await.unwrap();
    assert_eq!(stats.total_records, 2);
    assert!(stats.index_size_bytes.unwrap_or(0) > 0);

    let response = service
        .search(&Filter::new().with("state", "CA"), None)
        .await
        .unwrap();
    assert_eq!(counts(&response, "seller"), pairs(&[("agent", 1)]));
    assert_eq!(service.get_record(id).await.unwrap().fields["state"], FieldValue::from("CA"));
}

#[tokio::test]
async fn test_clear_index() {
    for (backend, service) in create_test_services().await {
        service.ingest_batch(&generated_listings(10)).await.unwrap();
        service.clear_index().await.unwrap();

        let response = service.search(&Filter::new(), None).await.unwrap();
        assert_eq!(response.total_matches, 0, "{}", backend);
        assert!(response.facets.is_empty(), "{}", backend);
    }
}
