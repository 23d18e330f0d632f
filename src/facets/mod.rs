//! Faceted search core
//!
//! Records carry flat `field -> value` metadata. Each pair is encoded into a
//! `field:value` token, and the index keeps, per record, the set of its
//! tokens. A query is a filter (a conjunction of field/value equalities):
//!
//! - **Containment**: select records whose token set holds every filter token
//! - **Tally**: count every token of the selected records, skipping the
//!   fields named in the filter
//! - **Ranking**: group counts by field, order by count descending then value
//!   ascending, keep the top K per field
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Facet Service API                   │
//! ├─────────────────────────────────────────────────┤
//! │  - ingest()        - ingest_batch()             │
//! │  - delete()        - get_record()               │
//! │  - search()        - search_with_budget()       │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │     Encoder  ->  Query Planner  ->  Aggregator   │
//! ├─────────────────────────────────────────────────┤
//! │  - field:value tokens with escaping             │
//! │  - deadline and cancellation checks             │
//! │  - per-field parallel top-K ranking             │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │        Token Index (memory | tantivy)            │
//! ├─────────────────────────────────────────────────┤
//! │  - Posting lists / facet field per token        │
//! │  - Immutable read snapshots                     │
//! │  - Serialized writer                            │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use facet_engine::facets::{FacetConfig, FacetService, Filter, Record, RecordId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = FacetService::new(FacetConfig::default()).await?;
//!
//!     let listing = Record::new(RecordId::new())
//!         .with_field("state", "CA")
//!         .with_field("seller", "agent");
//!     service.ingest_record(&listing).await?;
//!
//!     let response = service
//!         .search(&Filter::new().with("state", "CA"), Some(10))
//!         .await?;
//!     println!("{} matches", response.total_matches);
//!
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod budget;
mod config;
pub mod encoder;
mod error;
pub mod index;
mod planner;
mod record;
mod service;

pub use aggregator::{Aggregator, FacetCount, FacetGroups, TokenCounts};
pub use budget::{CancellationHandle, QueryBudget};
pub use config::{FacetConfig, FacetConfigBuilder, IndexBackend};
pub use encoder::{Encoder, Token, TokenSequence};
pub use error::{FacetError, FacetResult};
pub use index::{create_index, FacetIndex, IndexSnapshot, IndexStats};
pub use planner::{FacetResponse, QueryPlanner};
pub use record::{FieldValue, Filter, FilterClause, Record, RecordId};
pub use service::FacetService;
