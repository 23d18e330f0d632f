pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::facets::FacetService;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FacetService>,
    pub started_at: Instant,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<FacetService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-request timeout applied by the router
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
