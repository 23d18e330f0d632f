//! Facet engine configuration

use crate::facets::error::{FacetError, FacetResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend behind the facet index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// In-process inverted index, lost on restart
    #[default]
    Memory,
    /// Persistent Tantivy index
    Tantivy,
}

impl std::fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexBackend::Memory => write!(f, "memory"),
            IndexBackend::Tantivy => write!(f, "tantivy"),
        }
    }
}

/// Facet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetConfig {
    /// Index backend
    #[serde(default)]
    pub backend: IndexBackend,

    /// Path to the index directory (tantivy only; `None` keeps the index in RAM)
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Index writer heap size in bytes (default: 50MB)
    #[serde(default = "default_writer_heap_size")]
    pub writer_heap_size: usize,

    /// Top-K applied when a query does not ask for one
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound on any requested top-K
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Maximum number of clauses in a filter
    #[serde(default = "default_max_filter_fields")]
    pub max_filter_fields: usize,

    /// Default query deadline in milliseconds (0 disables the deadline)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Rank each field group on the rayon pool
    #[serde(default = "default_true")]
    pub parallel_ranking: bool,

    /// Longest accepted field name, in bytes
    #[serde(default = "default_max_field_len")]
    pub max_field_len: usize,

    /// Longest accepted value, in bytes
    #[serde(default = "default_max_value_len")]
    pub max_value_len: usize,
}

impl Default for FacetConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            index_path: None,
            writer_heap_size: default_writer_heap_size(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_filter_fields: default_max_filter_fields(),
            query_timeout_ms: default_query_timeout_ms(),
            parallel_ranking: true,
            max_field_len: default_max_field_len(),
            max_value_len: default_max_value_len(),
        }
    }
}

impl FacetConfig {
    /// Check that the values are usable together
    pub fn validate(&self) -> FacetResult<()> {
        if self.default_top_k == 0 {
            return Err(FacetError::InvalidConfiguration(
                "default_top_k must be at least 1".to_string(),
            ));
        }
        if self.max_top_k < self.default_top_k {
            return Err(FacetError::InvalidConfiguration(format!(
                "max_top_k ({}) is smaller than default_top_k ({})",
                self.max_top_k, self.default_top_k
            )));
        }
        if self.max_filter_fields == 0 {
            return Err(FacetError::InvalidConfiguration(
                "max_filter_fields must be at least 1".to_string(),
            ));
        }
        if self.max_field_len == 0 || self.max_value_len == 0 {
            return Err(FacetError::InvalidConfiguration(
                "field and value length limits must be non-zero".to_string(),
            ));
        }
        // Tantivy refuses writer budgets below 15MB
        if self.backend == IndexBackend::Tantivy && self.writer_heap_size < 15_000_000 {
            return Err(FacetError::InvalidConfiguration(format!(
                "writer_heap_size {} is below the 15MB minimum",
                self.writer_heap_size
            )));
        }
        Ok(())
    }

    /// Default deadline as a duration, if one is configured
    pub fn query_timeout(&self) -> Option<std::time::Duration> {
        (self.query_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.query_timeout_ms))
    }
}

/// Builder for FacetConfig
pub struct FacetConfigBuilder {
    config: FacetConfig,
}

impl FacetConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: FacetConfig::default(),
        }
    }

    pub fn backend(mut self, backend: IndexBackend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn index_path(mut self, path: PathBuf) -> Self {
        self.config.index_path = Some(path);
        self
    }

    pub fn writer_heap_size(mut self, size: usize) -> Self {
        self.config.writer_heap_size = size;
        self
    }

    pub fn default_top_k(mut self, top_k: usize) -> Self {
        self.config.default_top_k = top_k;
        self
    }

    pub fn max_top_k(mut self, top_k: usize) -> Self {
        self.config.max_top_k = top_k;
        self
    }

    pub fn max_filter_fields(mut self, max: usize) -> Self {
        self.config.max_filter_fields = max;
        self
    }

    pub fn query_timeout_ms(mut self, ms: u64) -> Self {
        self.config.query_timeout_ms = ms;
        self
    }

    pub fn parallel_ranking(mut self, enabled: bool) -> Self {
        self.config.parallel_ranking = enabled;
        self
    }

    pub fn max_field_len(mut self, len: usize) -> Self {
        self.config.max_field_len = len;
        self
    }

    pub fn max_value_len(mut self, len: usize) -> Self {
        self.config.max_value_len = len;
        self
    }

    pub fn build(self) -> FacetConfig {
        self.config
    }
}

impl Default for FacetConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_writer_heap_size() -> usize {
    50_000_000
}

fn default_top_k() -> usize {
    50
}

fn default_max_top_k() -> usize {
    1000
}

fn default_max_filter_fields() -> usize {
    100
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_max_field_len() -> usize {
    256
}

fn default_max_value_len() -> usize {
    1024
}
