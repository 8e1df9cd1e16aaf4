//! Bounded ring of the most recently finalized records
//!
//! Exists for liveness reporting: a cheap answer to "is the pipeline still
//! producing verdicts, and how fresh is the newest one". Ordering is
//! finalize-order, not arrival-order.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::models::FinalizedRecord;

pub struct RecentBuffer {
    records: Mutex<VecDeque<FinalizedRecord>>,
    capacity: usize,
}

impl RecentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Push a record, evicting the oldest once at capacity
    pub fn push(&self, record: FinalizedRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Newest-last snapshot of the buffer contents
    pub fn snapshot(&self) -> Vec<FinalizedRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Seconds since the newest record finalized, `None` when empty
    pub fn newest_age_secs(&self) -> Option<f64> {
        let records = self.records.lock();
        records.back().map(|r| {
            let age = chrono::Utc::now() - r.finalized_at;
            (age.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0).max(0.0)
        })
    }
}
