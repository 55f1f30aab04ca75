//! Resources created during the current process run.
//!
//! Every creation call registers the new resource here.  Membership grants
//! implicit read/write/delete access regardless of resource rules, and the
//! set is what session teardown iterates over.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

/// One resource minted by this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResource {
    /// The service whose creation call produced the resource.
    pub service: String,
    /// The resource identifier.
    pub id: String,
    /// Service-specific kind (e.g. "file", "folder", "spreadsheet").
    pub kind: String,
    /// When the resource was registered.
    pub created_at: DateTime<Utc>,
    /// Registration order, used to tear down newest-first.
    pub sequence: u64,
}

/// Process-wide set of session resources, keyed by resource id.
#[derive(Debug, Default)]
pub struct SessionResources {
    entries: DashMap<String, SessionResource>,
    next_sequence: AtomicU64,
}

impl SessionResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource.  Returns `false` if the id was already tracked
    /// (the first registration is kept).
    pub fn track(&self, service: &str, id: &str, kind: &str) -> bool {
        let Entry::Vacant(slot) = self.entries.entry(id.to_string()) else {
            return false;
        };
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        slot.insert(SessionResource {
            service: service.to_string(),
            id: id.to_string(),
            kind: kind.to_string(),
            created_at: Utc::now(),
            sequence,
        });
        tracing::debug!(service, resource = id, kind, "session resource tracked");
        true
    }

    /// Whether `id` was created in this session.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Look up a tracked resource.
    pub fn get(&self, id: &str) -> Option<SessionResource> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Stop tracking one resource.
    pub fn untrack(&self, id: &str) -> Option<SessionResource> {
        self.entries.remove(id).map(|(_, r)| r)
    }

    /// Resources created through `service`, newest first.
    pub fn for_service(&self, service: &str) -> Vec<SessionResource> {
        let mut out: Vec<SessionResource> = self
            .entries
            .iter()
            .filter(|e| e.value().service == service)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        out
    }

    /// Distinct services that own at least one resource, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.value().service.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_and_contains() {
        let set = SessionResources::new();
        assert!(set.track("Drive", "r1", "file"));
        assert!(set.contains("r1"));
        assert!(!set.contains("r2"));
        assert_eq!(set.get("r1").unwrap().service, "Drive");
    }

    #[test]
    fn duplicate_track_keeps_original() {
        let set = SessionResources::new();
        assert!(set.track("Drive", "r1", "file"));
        assert!(!set.track("Sheets", "r1", "spreadsheet"));
        assert_eq!(set.get("r1").unwrap().kind, "file");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn for_service_is_newest_first() {
        let set = SessionResources::new();
        set.track("Drive", "a", "folder");
        set.track("Drive", "b", "file");
        set.track("Calendar", "c", "calendar");

        let ids: Vec<_> = set.for_service("Drive").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(set.services(), vec!["Calendar", "Drive"]);
    }

    #[test]
    fn clear_forgets_every_service() {
        let set = SessionResources::new();
        set.track("Drive", "a", "file");
        set.track("Calendar", "c", "calendar");
        assert_eq!(set.len(), 2);

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn untrack_removes() {
        let set = SessionResources::new();
        set.track("Drive", "a", "file");
        assert_eq!(set.untrack("a").map(|r| r.id).as_deref(), Some("a"));
        assert!(set.untrack("a").is_none());
    }
}
