//! Bounded per-resource error history kept for diagnostics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::NetworkErrorKind;

/// One classified failure against a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkErrorRecord {
    /// Classification tag.
    pub kind: NetworkErrorKind,
    /// Failure message.
    pub message: String,
    /// Resource key the failure belongs to.
    pub resource: String,
    /// Zero-based retry ordinal the failure happened on.
    pub retry: u32,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl NetworkErrorRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        resource: impl Into<String>,
        kind: NetworkErrorKind,
        message: impl Into<String>,
        retry: u32,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            resource: resource.into(),
            retry,
            at: Utc::now(),
        }
    }
}

/// Resources tracked at once; the one with the oldest failure is dropped first.
pub(crate) const MAX_TRACKED_RESOURCES: usize = 256;

#[derive(Debug, Default)]
struct ResourceHistory {
    last_seq: u64,
    records: VecDeque<NetworkErrorRecord>,
}

/// Ring buffer of failures per resource, over a bounded set of resources.
#[derive(Debug)]
pub(crate) struct ErrorHistory {
    capacity: usize,
    max_resources: usize,
    seq: AtomicU64,
    entries: DashMap<String, ResourceHistory>,
}

impl ErrorHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self::with_limits(capacity, MAX_TRACKED_RESOURCES)
    }

    pub(crate) fn with_limits(capacity: usize, max_resources: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            max_resources: max_resources.max(1),
            seq: AtomicU64::new(0),
            entries: DashMap::new(),
        }
    }

    pub(crate) fn record(&self, record: NetworkErrorRecord) {
        if !self.entries.contains_key(&record.resource) && self.entries.len() >= self.max_resources {
            self.evict_stalest();
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.entries.entry(record.resource.clone()).or_default();
        if entry.records.len() == self.capacity {
            entry.records.pop_front();
        }
        entry.records.push_back(record);
        entry.last_seq = seq;
    }

    pub(crate) fn clear(&self, resource: &str) {
        self.entries.remove(resource);
    }

    pub(crate) fn get(&self, resource: &str) -> Vec<NetworkErrorRecord> {
        self.entries
            .get(resource)
            .map(|entry| entry.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn tracked_resources(&self) -> usize {
        self.entries.len()
    }

    fn evict_stalest(&self) {
        let stalest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_seq)
            .map(|entry| entry.key().clone());
        if let Some(resource) = stalest {
            debug!(%resource, "error history full, dropping stalest resource");
            self.entries.remove(&resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let history = ErrorHistory::new(2);
        for retry in 0..5 {
            history.record(NetworkErrorRecord::new(
                "r",
                NetworkErrorKind::ServerError,
                "HTTP 500",
                retry,
            ));
        }
        let records = history.get("r");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].retry, 3);
        assert_eq!(records[1].retry, 4);
    }

    #[test]
    fn test_history_isolated_per_resource_and_clearable() {
        let history = ErrorHistory::new(4);
        history.record(NetworkErrorRecord::new("a", NetworkErrorKind::Timeout, "t", 0));
        history.record(NetworkErrorRecord::new("b", NetworkErrorKind::Unknown, "u", 0));
        history.clear("a");
        assert!(history.get("a").is_empty());
        assert_eq!(history.get("b").len(), 1);
    }

    #[test]
    fn test_tracked_resources_bounded_evicting_stalest() {
        let history = ErrorHistory::with_limits(4, 2);
        history.record(NetworkErrorRecord::new("a", NetworkErrorKind::Timeout, "t", 0));
        history.record(NetworkErrorRecord::new("b", NetworkErrorKind::Timeout, "t", 0));
        // Touching "a" makes "b" the stalest.
        history.record(NetworkErrorRecord::new("a", NetworkErrorKind::Timeout, "t", 1));
        history.record(NetworkErrorRecord::new("c", NetworkErrorKind::Timeout, "t", 0));

        assert_eq!(history.tracked_resources(), 2);
        assert!(history.get("b").is_empty());
        assert_eq!(history.get("a").len(), 2);
        assert_eq!(history.get("c").len(), 1);
    }

    #[test]
    fn test_default_history_tracks_bounded_resources() {
        let history = ErrorHistory::new(1);
        for n in 0..MAX_TRACKED_RESOURCES + 10 {
            history.record(NetworkErrorRecord::new(
                format!("https://r{n}.test/"),
                NetworkErrorKind::ConnectionFailure,
                "refused",
                0,
            ));
        }
        assert_eq!(history.tracked_resources(), MAX_TRACKED_RESOURCES);
        assert!(history.get("https://r0.test/").is_empty());
        assert_eq!(history.get(&format!("https://r{}.test/", MAX_TRACKED_RESOURCES + 9)).len(), 1);
    }
}
