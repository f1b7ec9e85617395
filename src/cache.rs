use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::approval::ApprovalRequest;

/// In-process mirror of approval records, owned by the `ApprovalStore`.
///
/// Writes replace the whole record under the shard lock, so concurrent
/// readers observe either the old or the new record, never a mix. The
/// durable store stays the source of truth; this tier serves reads when it
/// is unreachable and carries records written while it was down.
#[derive(Clone, Default)]
pub struct ApprovalCache {
    pub(crate) local: Arc<DashMap<String, ApprovalRequest>>,
}

impl ApprovalCache {
    pub fn new() -> Self {
        Self {
            local: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.local.get(id).map(|entry| entry.value().clone())
    }

    /// Insert only if no record with this id exists. Returns `false` on collision.
    pub fn insert_new(&self, record: ApprovalRequest) -> bool {
        match self.local.entry(record.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Last-writer-wins replace.
    pub fn set(&self, record: ApprovalRequest) {
        self.local.insert(record.id.clone(), record);
    }

    pub fn invalidate(&self, id: &str) {
        self.local.remove(id);
    }

    pub fn snapshot(&self) -> Vec<ApprovalRequest> {
        self.local.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Current number of cached records (for health output / debugging).
    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}
