//! Dex store: batch fetch orchestration and the bulk aggregator that owns the
//! in-memory collection.

#![forbid(unsafe_code)]

pub mod batch;
pub mod bulk;

pub use batch::{fetch_batch, fetch_batch_outcomes, BatchOutcome, Omission};
pub use bulk::{Aggregator, BulkConfig, LoadError, LoadState};
