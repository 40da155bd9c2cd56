//! Unresolved conflict warnings, one per requester

use crate::scan::ConflictReport;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// The most recent conflict report shown to each requester.
///
/// Shared by the command side and the executor workers.
#[derive(Debug, Default)]
pub struct PendingWarnStore {
    entries: Mutex<HashMap<String, ConflictReport>>,
}

impl PendingWarnStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConflictReport>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember `report` for `requester`, replacing any earlier one
    pub fn record_conflict(&self, requester: &str, report: ConflictReport) {
        debug!(requester, conflicts = report.len(), "Recording pending warning");
        self.lock().insert(requester.to_string(), report);
    }

    pub fn clear_for_requester(&self, requester: &str) {
        self.lock().remove(requester);
    }

    pub fn get_conflict(&self, requester: &str) -> Option<ConflictReport> {
        self.lock().get(requester).cloned()
    }

    /// Whether the stored warning is about this exact source and destination.
    ///
    /// The command layer uses this to treat a bare repeat of a warned request
    /// as confirmation.
    pub fn was_just_warned(&self, requester: &str, source: &Path, destination: &Path) -> bool {
        self.lock()
            .get(requester)
            .map(|r| r.source() == source && r.destination() == destination)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::PagedList;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn report(src: &str, dest: &str) -> ConflictReport {
        ConflictReport::new(
            PathBuf::from(src),
            PathBuf::from(dest),
            PagedList::new(vec!["a".to_string(), "b".to_string()], 4),
        )
    }

    #[test]
    fn test_clear_right_after_record() {
        let store = PendingWarnStore::new();
        store.record_conflict("alice", report("a.zip", "out"));
        store.clear_for_requester("alice");
        assert!(store.get_conflict("alice").is_none());
    }

    #[test]
    fn test_requesters_are_independent() {
        let store = PendingWarnStore::new();
        store.record_conflict("alice", report("a.zip", "out"));
        store.record_conflict("bob", report("b.zip", "out"));
        store.clear_for_requester("alice");

        assert!(store.get_conflict("alice").is_none());
        assert_eq!(
            store.get_conflict("bob").unwrap().source(),
            Path::new("b.zip")
        );
    }

    #[test]
    fn test_was_just_warned() {
        let store = PendingWarnStore::new();
        assert!(!store.was_just_warned("alice", Path::new("a.zip"), Path::new("out")));

        store.record_conflict("alice", report("a.zip", "out"));
        assert!(store.was_just_warned("alice", Path::new("a.zip"), Path::new("out")));
        assert!(!store.was_just_warned("alice", Path::new("a.zip"), Path::new("elsewhere")));
        assert!(!store.was_just_warned("bob", Path::new("a.zip"), Path::new("out")));
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(PendingWarnStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let name = format!("user{}", i);
                    for _ in 0..100 {
                        store.record_conflict(&name, report("a.zip", "out"));
                        store.clear_for_requester(&name);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            assert!(store.get_conflict(&format!("user{}", i)).is_none());
        }
    }
}
