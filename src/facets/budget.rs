//! Query deadlines and cooperative cancellation

use crate::facets::error::{FacetError, FacetResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Iterations between two budget checks inside scan loops
pub const CHECK_INTERVAL: usize = 1024;

/// Shared flag a caller can trip to abandon a running query
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Time and cancellation budget carried by one query
#[derive(Debug, Clone)]
pub struct QueryBudget {
    started: Instant,
    deadline: Option<Instant>,
    cancellation: CancellationHandle,
}

impl QueryBudget {
    /// No deadline, cancellable only through the handle
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            deadline: None,
            cancellation: CancellationHandle::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: Some(started + timeout),
            cancellation: CancellationHandle::new(),
        }
    }

    /// Use `timeout` when present, otherwise no deadline
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::with_timeout).unwrap_or_else(Self::unbounded)
    }

    /// Share an existing cancellation handle
    pub fn with_cancellation(mut self, handle: CancellationHandle) -> Self {
        self.cancellation = handle;
        self
    }

    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail if the query was cancelled or ran past its deadline
    pub fn check(&self) -> FacetResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(FacetError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(FacetError::Timeout {
                    elapsed_ms: self.elapsed().as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Check only every [`CHECK_INTERVAL`] iterations
    #[inline]
    pub fn tick(&self, iteration: usize) -> FacetResult<()> {
        if iteration % CHECK_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

impl Default for QueryBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}
