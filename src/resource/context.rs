//! Per-request resolution context

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Carried through one resolution for log correlation and timing
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub request_id: Uuid,
    pub received_at: DateTime<Utc>,
    started: Instant,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::with_request_id(Uuid::new_v4())
    }

    /// Context correlated with an id assigned upstream (e.g. a request header)
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            received_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_get_distinct_ids() {
        let a = ResolutionContext::new();
        let b = ResolutionContext::new();
        assert_ne!(a.request_id, b.request_id);

        let id = Uuid::new_v4();
        assert_eq!(ResolutionContext::with_request_id(id).request_id, id);
    }
}
