//! Ingestion queue, worker pool and recent-verdict buffer
//!
//! The hot path touches only [`queue::IngestionQueue::enqueue`]; everything
//! else runs on worker threads.

pub mod queue;
pub mod recent;
pub mod workers;

pub use queue::{EnqueueError, IngestionQueue};
pub use recent::RecentBuffer;
pub use workers::WorkerPool;
