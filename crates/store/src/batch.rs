//! Concurrent fetch of many entities by id, tolerant of individual failures.

#![forbid(unsafe_code)]

use std::sync::Arc;

use dex_core::Entity;
use dex_gateway::{Gateway, GatewayError};
use futures::stream::{FuturesUnordered, StreamExt};
use metrics::counter;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

/// An id the batch could not resolve, with the gateway error that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omission {
    pub id: u32,
    pub reason: GatewayError,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Fetched(Arc<Entity>),
    Omitted(Omission),
}

impl BatchOutcome {
    pub fn entity(&self) -> Option<&Arc<Entity>> {
        match self {
            BatchOutcome::Fetched(e) => Some(e),
            BatchOutcome::Omitted(_) => None,
        }
    }
}

/// Resolve every id concurrently. Outcomes arrive in completion order; repeated
/// ids are fetched once.
pub async fn fetch_batch_outcomes(gateway: &Gateway, ids: &[u32]) -> Vec<BatchOutcome> {
    let mut seen = FxHashSet::default();
    let mut pending: FuturesUnordered<_> = ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .map(|id| async move { (id, gateway.fetch_entity(id).await) })
        .collect();
    let mut out = Vec::with_capacity(pending.len());
    while let Some((id, res)) = pending.next().await {
        out.push(match res {
            Ok(e) => BatchOutcome::Fetched(e),
            Err(reason) => BatchOutcome::Omitted(Omission { id, reason }),
        });
    }
    out
}

/// Entities for `ids`, silently dropping the ones that failed. Never errors.
pub async fn fetch_batch(gateway: &Gateway, ids: &[u32]) -> Vec<Arc<Entity>> {
    if ids.is_empty() {
        return Vec::new();
    }
    let outcomes = fetch_batch_outcomes(gateway, ids).await;
    let mut fetched = Vec::with_capacity(outcomes.len());
    let mut omitted = 0usize;
    for o in outcomes {
        match o {
            BatchOutcome::Fetched(e) => fetched.push(e),
            BatchOutcome::Omitted(Omission { id, reason }) => {
                omitted += 1;
                counter!("batch_omitted_total", 1u64);
                warn!(id, error = %reason, "batch: entity omitted");
            }
        }
    }
    debug!(requested = ids.len(), fetched = fetched.len(), omitted, "batch: done");
    fetched
}
