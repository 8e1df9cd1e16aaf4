//! Lock-free ingestion queue between the capture collaborator and workers
//!
//! `enqueue` is the latency contract of the whole pipeline: it performs no
//! blocking I/O and returns in O(1) regardless of depth. The default queue is
//! unbounded so observations are never dropped under load; the cost is that
//! sustained enrichment failure lets memory grow, which the depth gauge in
//! the metrics snapshot makes observable. Deployments that prefer bounded
//! memory can set a capacity, trading the never-drop contract for rejecting
//! new observations when full.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::models::ConnectionObservation;

#[derive(Debug, Error)]
pub enum EnqueueError {
    /// Only possible in bounded mode
    #[error("ingestion queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// All workers have shut down
    #[error("ingestion queue disconnected")]
    Disconnected,
}

/// Multi-producer multi-consumer observation queue
#[derive(Clone)]
pub struct IngestionQueue {
    sender: Sender<ConnectionObservation>,
    receiver: Receiver<ConnectionObservation>,
    capacity: usize,
}

impl IngestionQueue {
    /// `capacity` of 0 selects the default unbounded mode
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = if capacity == 0 {
            unbounded()
        } else {
            bounded(capacity)
        };

        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Push one observation. Never blocks; O(1) at any depth.
    pub fn enqueue(&self, observation: ConnectionObservation) -> Result<(), EnqueueError> {
        match self.sender.try_send(observation) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(EnqueueError::Disconnected),
        }
    }

    /// Consumer side handle for a worker thread
    pub(crate) fn receiver(&self) -> Receiver<ConnectionObservation> {
        self.receiver.clone()
    }

    /// Observations currently queued. The channel maintains this count
    /// itself, so the gauge stays exact under producer/consumer races.
    pub fn depth(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }
}
