//! Faceted search engine
//!
//! Given a set of records with flat key/value metadata and a filter, returns
//! for every field outside the filter the most frequent values among the
//! matching records, with counts.
//!
//! The [`facets`] module is the engine itself; [`api`] serves it over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod facets;
pub mod metrics;

pub use error::{AppError, Result};
