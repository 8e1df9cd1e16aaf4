//! Persistence seam for finalized records
//!
//! Storage failures are isolated: a worker logs and counts them, then
//! continues with the other sinks.

use anyhow::Result;
use parking_lot::Mutex;

use crate::models::FinalizedRecord;

/// Storage collaborator seam, callable from multiple workers at once
pub trait RecordStore: Send + Sync {
    fn persist(&self, record: &FinalizedRecord) -> Result<()>;

    /// Number of records held, where the backend can say
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store, for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<FinalizedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FinalizedRecord> {
        self.records.lock().clone()
    }
}

impl RecordStore for MemoryStore {
    fn persist(&self, record: &FinalizedRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionObservation, Protocol, ThreatIntel};

    #[test]
    fn test_memory_store_persists() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        let obs = ConnectionObservation::new(
            "10.0.0.1".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
            443,
            Protocol::Tcp,
        );
        let record = FinalizedRecord::fallback(obs, ThreatIntel::default(), 0.2, 0.5);
        store.persist(&record).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].id, record.id);
    }
}
