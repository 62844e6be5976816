//! Bulk aggregator: loads the whole catalog in bounded waves, publishing a new
//! collection snapshot and progress after each wave.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dex_core::{Collection, Entity, LoadProgress};
use dex_gateway::{Gateway, GatewayError};
use metrics::{gauge, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::batch::fetch_batch;

pub const DEFAULT_GROUP_SIZE: usize = 100;
pub const DEFAULT_WAVE_WIDTH: usize = 3;
pub const DEFAULT_WAVE_DELAY_MS: u64 = 10;

/// Wave shape; `from_env` reads `DEX_GROUP_SIZE`, `DEX_WAVE_WIDTH`, `DEX_WAVE_DELAY_MS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkConfig {
    /// Ids per group (one batch fetch).
    pub group_size: usize,
    /// Groups in flight per wave.
    pub wave_width: usize,
    pub wave_delay: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            wave_width: DEFAULT_WAVE_WIDTH,
            wave_delay: Duration::from_millis(DEFAULT_WAVE_DELAY_MS),
        }
    }
}

impl BulkConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let group_size = std::env::var("DEX_GROUP_SIZE").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.group_size);
        let wave_width = std::env::var("DEX_WAVE_WIDTH").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.wave_width);
        let wave_delay = std::env::var("DEX_WAVE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(d.wave_delay);
        Self { group_size: group_size.max(1), wave_width: wave_width.max(1), wave_delay }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum LoadState {
    Idle,
    Loading(LoadProgress),
    Loaded(LoadProgress),
    Error(String),
}

impl LoadState {
    pub fn is_loading(&self) -> bool { matches!(self, LoadState::Loading(_)) }
    pub fn is_loaded(&self) -> bool { matches!(self, LoadState::Loaded(_)) }

    pub fn progress(&self) -> Option<LoadProgress> {
        match self {
            LoadState::Loading(p) | LoadState::Loaded(p) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The listing that yields the total count and id set could not be fetched.
    #[error("initial count: {0}")]
    InitialCount(GatewayError),
    #[error("load already in progress")]
    InProgress,
}

/// Sets `Error` if a load is dropped before it finishes.
struct Abandoned<'a> {
    tx: &'a watch::Sender<LoadState>,
    armed: bool,
}

impl Drop for Abandoned<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tx.send_if_modified(|s| {
                if s.is_loading() {
                    *s = LoadState::Error("load cancelled".into());
                    true
                } else {
                    false
                }
            });
        }
    }
}

pub struct Aggregator {
    gateway: Arc<Gateway>,
    cfg: BulkConfig,
    state_tx: watch::Sender<LoadState>,
    snap: Arc<ArcSwap<Collection>>,
}

impl Aggregator {
    pub fn new(gateway: Arc<Gateway>, cfg: BulkConfig) -> Self {
        let (state_tx, _) = watch::channel(LoadState::Idle);
        Self { gateway, cfg, state_tx, snap: Arc::new(ArcSwap::from_pointee(Collection::default())) }
    }

    pub fn config(&self) -> BulkConfig { self.cfg }

    /// Latest published collection; grows wave by wave during a load.
    pub fn current(&self) -> Arc<Collection> { self.snap.load_full() }

    pub fn state(&self) -> LoadState { self.state_tx.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> { self.state_tx.subscribe() }

    /// Move `Idle` or `Error` to `Loading`. Fails when a load is running or done.
    fn claim(&self) -> bool {
        self.state_tx.send_if_modified(|s| match s {
            LoadState::Idle | LoadState::Error(_) => {
                *s = LoadState::Loading(LoadProgress::default());
                true
            }
            _ => false,
        })
    }

    /// Spawn a load in the background. Returns `None` when one is already running
    /// or the collection is loaded.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<Result<Arc<Collection>, LoadError>>> {
        if !self.claim() {
            debug!(state = ?self.state(), "bulk: start ignored");
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run_claimed().await }))
    }

    /// Load in the caller's task. A finished load returns its collection again.
    pub async fn load(&self) -> Result<Arc<Collection>, LoadError> {
        if !self.claim() {
            return match self.state() {
                LoadState::Loaded(_) => Ok(self.current()),
                _ => Err(LoadError::InProgress),
            };
        }
        self.run_claimed().await
    }

    async fn run_claimed(&self) -> Result<Arc<Collection>, LoadError> {
        let mut guard = Abandoned { tx: &self.state_tx, armed: true };
        let t0 = Instant::now();
        let res = self.run_waves().await;
        guard.armed = false;
        match res {
            Ok(progress) => {
                let coll = self.current();
                self.state_tx.send_replace(LoadState::Loaded(progress));
                histogram!("bulk_load_ms", t0.elapsed().as_secs_f64() * 1_000.0);
                info!(loaded = coll.items.len(), total = progress.total, took_ms = %t0.elapsed().as_millis(), "bulk: load ok");
                Ok(coll)
            }
            Err(e) => {
                error!(error = %e, "bulk: load failed");
                self.state_tx.send_replace(LoadState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_waves(&self) -> Result<LoadProgress, LoadError> {
        let head = self.gateway.fetch_page(0, 1).await.map_err(LoadError::InitialCount)?;
        let total = head.count;
        let ids = if total == 0 {
            Vec::new()
        } else {
            self.gateway.fetch_page(0, total).await.map_err(LoadError::InitialCount)?.ids()
        };
        info!(total, ids = ids.len(), "bulk: listing ok");

        let groups: Vec<&[u32]> = ids.chunks(self.cfg.group_size).collect();
        let waves: Vec<&[&[u32]]> = groups.chunks(self.cfg.wave_width).collect();
        let mut items: Vec<Arc<Entity>> = Vec::with_capacity(ids.len());
        let mut progress = LoadProgress { current: 0, total };
        self.state_tx.send_replace(LoadState::Loading(progress));

        for (i, wave) in waves.iter().enumerate() {
            let fetched = futures::future::join_all(wave.iter().map(|g| fetch_batch(&self.gateway, g))).await;
            items.extend(fetched.into_iter().flatten());
            items.sort_by_key(|e| e.id);
            progress.current = items.len() as u32;
            self.publish(&items, total);
            self.state_tx.send_replace(LoadState::Loading(progress));
            debug!(wave = i + 1, waves = waves.len(), loaded = progress.current, total, "bulk: wave done");
            if i + 1 < waves.len() && !self.cfg.wave_delay.is_zero() {
                tokio::time::sleep(self.cfg.wave_delay).await;
            }
        }
        if waves.is_empty() {
            self.publish(&items, total);
        }
        Ok(progress)
    }

    fn publish(&self, items: &[Arc<Entity>], total: u32) {
        let epoch = self.snap.load().epoch.saturating_add(1);
        self.snap.store(Arc::new(Collection { epoch, total, items: items.to_vec() }));
        gauge!("bulk_loaded_entities", items.len() as f64);
    }
}
