use std::sync::Arc;

use dashmap::DashMap;

pub const QUEUED: &str = "QUEUED";
pub const RUNNING: &str = "RUNNING";
pub const COMPLETED: &str = "COMPLETED";
pub const FAILED: &str = "FAILED";
pub const TIMEOUT: &str = "TIMEOUT";

/// Worker-index to status-label table. The bridge seeds it and snapshots
/// it; only the collaborator overwrites labels while work is in flight.
#[derive(Clone, Default)]
pub struct ProgressTable {
    entries: Arc<DashMap<usize, String>>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, total_workers: usize) {
        for index in 0..total_workers {
            self.entries.insert(index, QUEUED.to_string());
        }
    }

    pub fn set(&self, worker_index: usize, label: &str) {
        self.entries.insert(worker_index, label.to_string());
    }

    pub fn get(&self, worker_index: usize) -> Option<String> {
        self.entries.get(&worker_index).map(|e| e.value().clone())
    }

    /// Current entries ordered by worker index.
    pub fn snapshot(&self) -> Vec<(usize, String)> {
        let mut entries: Vec<(usize, String)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(index, _)| *index);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{ProgressTable, COMPLETED, QUEUED, RUNNING};

    #[test]
    fn seed_marks_every_index_queued() {
        let table = ProgressTable::new();
        table.seed(3);
        assert_eq!(
            table.snapshot(),
            vec![
                (0, QUEUED.to_string()),
                (1, QUEUED.to_string()),
                (2, QUEUED.to_string())
            ]
        );
    }

    #[test]
    fn labels_overwrite_in_place() {
        let table = ProgressTable::new();
        table.seed(2);
        table.set(1, RUNNING);
        table.set(1, COMPLETED);
        assert_eq!(table.get(1).as_deref(), Some(COMPLETED));
        assert_eq!(table.get(0).as_deref(), Some(QUEUED));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn snapshot_is_ordered_by_index() {
        let table = ProgressTable::new();
        table.set(2, "a");
        table.set(0, "b");
        table.set(1, "c");
        let indexes: Vec<usize> = table.snapshot().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }
}
