use crate::differ::patch::diff;
use crate::differ::savings::estimate_savings;
use crate::models::patch::{PatchOperation, Savings};
use crate::models::task::Task;
use crate::utils::time::current_timestamp_millis;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Last known task list of one server, plus the patches that produced it
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    /// Bumped on every poll that changed something
    pub revision: u64,
    pub tasks: Vec<Task>,
    pub last_patches: Vec<PatchOperation>,
    pub savings: Savings,
    /// Epoch milliseconds of the last successful poll
    pub updated_at: i64,
}

/// Outcome of recording one poll
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    pub revision: u64,
    pub has_changes: bool,
    pub patch_count: usize,
    pub savings: Savings,
}

/// Per-server snapshots, keyed by server name
///
/// Each server is diffed only against its own previous poll.
pub struct SnapshotStore {
    snapshots: DashMap<String, Arc<ServerSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
        }
    }

    /// Record a fresh task list for `server` and return what changed
    ///
    /// The first poll of a server is diffed against an empty list. A poll
    /// without changes keeps the previous patches and revision.
    pub fn update(&self, server: &str, tasks: Vec<Task>) -> SnapshotUpdate {
        let mut entry = self.snapshots.entry(server.to_string()).or_insert_with(|| {
            Arc::new(ServerSnapshot {
                revision: 0,
                tasks: Vec::new(),
                last_patches: Vec::new(),
                savings: Savings::default(),
                updated_at: 0,
            })
        });

        let previous = Arc::clone(entry.value());
        let result = diff(&previous.tasks, &tasks, 0);
        let now = current_timestamp_millis();

        let next = if result.has_changes {
            let savings = estimate_savings(&tasks, &result.patches);
            ServerSnapshot {
                revision: previous.revision + 1,
                tasks,
                last_patches: result.patches,
                savings,
                updated_at: now,
            }
        } else {
            ServerSnapshot {
                updated_at: now,
                ..(*previous).clone()
            }
        };

        let update = SnapshotUpdate {
            revision: next.revision,
            has_changes: result.has_changes,
            patch_count: if result.has_changes { next.last_patches.len() } else { 0 },
            savings: next.savings,
        };
        *entry.value_mut() = Arc::new(next);
        update
    }

    pub fn get(&self, server: &str) -> Option<Arc<ServerSnapshot>> {
        self.snapshots.get(server).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, server: &str) -> Option<Arc<ServerSnapshot>> {
        self.snapshots.remove(server).map(|(_, snapshot)| snapshot)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::patch::apply;
    use crate::models::task::TaskStatus;

    fn task(id: &str, progress: f64) -> Task {
        Task::new(id, id, TaskStatus::Downloading).with_progress(progress)
    }

    #[test]
    fn test_first_poll_adds_everything() {
        let store = SnapshotStore::new();
        let update = store.update("qb", vec![task("a", 1.0), task("b", 2.0)]);

        assert!(update.has_changes);
        assert_eq!(update.revision, 1);
        assert_eq!(update.patch_count, 2);
        assert_eq!(store.get("qb").unwrap().tasks.len(), 2);
    }

    #[test]
    fn test_unchanged_poll_keeps_revision() {
        let store = SnapshotStore::new();
        store.update("qb", vec![task("a", 1.0)]);
        let update = store.update("qb", vec![task("a", 1.0)]);

        assert!(!update.has_changes);
        assert_eq!(update.revision, 1);
        assert_eq!(update.patch_count, 0);
    }

    #[test]
    fn test_patches_rebuild_current_from_previous() {
        let store = SnapshotStore::new();
        store.update("qb", vec![task("a", 50.0)]);
        let before = store.get("qb").unwrap();

        store.update("qb", vec![task("a", 75.0), task("c", 0.0)]);
        let after = store.get("qb").unwrap();

        assert_eq!(after.revision, 2);
        assert_eq!(apply(&before.tasks, &after.last_patches, 0).unwrap(), after.tasks);
    }

    #[test]
    fn test_servers_are_isolated() {
        let store = SnapshotStore::new();
        store.update("one", vec![task("a", 1.0)]);
        let update = store.update("two", vec![task("a", 1.0)]);

        assert!(update.has_changes);
        assert_eq!(store.len(), 2);
        assert!(store.remove("one").is_some());
        assert!(store.get("one").is_none());
    }
}
