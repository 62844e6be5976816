//! Dex public API façade (in-process).
//!
//! This crate defines the traits and types frontends (CLI) depend on. The
//! in-process implementation is wired explicitly from a `Gateway` and an
//! `Aggregator`; nothing here is a global.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dex_core::{Collection, Entity, EntityKey, FilterSpec, LoadProgress, Page, SpeciesMeta};
use dex_gateway::{Gateway, GatewayConfig, GatewayError};
use dex_store::{Aggregator, BulkConfig, LoadError, LoadState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use dex_search::{FilterDebugInfo, ParsedQuery, QueryError};

pub const DEFAULT_QUEUE_CAP: usize = 64;

/// Effective runtime configuration exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Settings {
    pub base_url: String,
    pub max_in_flight: usize,
    pub timeout_secs: u64,
    pub group_size: usize,
    pub wave_width: usize,
    pub wave_delay_ms: u64,
    /// Buffered events per `load_all` stream (`DEX_QUEUE_CAP`).
    pub queue_cap: usize,
    pub db_path: Option<String>,
    pub metrics_addr: Option<String>,
}

impl Settings {
    pub fn new(gateway: &GatewayConfig, bulk: &BulkConfig) -> Self {
        Self {
            base_url: gateway.base_url.clone(),
            max_in_flight: gateway.max_in_flight,
            timeout_secs: gateway.timeout_secs,
            group_size: bulk.group_size,
            wave_width: bulk.wave_width,
            wave_delay_ms: bulk.wave_delay.as_millis() as u64,
            queue_cap: std::env::var("DEX_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(DEFAULT_QUEUE_CAP),
            db_path: std::env::var("DEX_DB_PATH").ok(),
            metrics_addr: std::env::var("DEX_METRICS_ADDR").ok(),
        }
    }
}

/// One listing page plus the entities it names, in listing order.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub page: Arc<Page>,
    pub entities: Vec<Arc<Entity>>,
}

impl PageResult {
    /// Listed entries that could not be fetched.
    pub fn omitted(&self) -> usize { self.page.results.len().saturating_sub(self.entities.len()) }
}

/// API errors suitable for transport over RPC later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum DexError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("network: {0}")]
    Network(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type DexResult<T> = Result<T, DexError>;

impl From<GatewayError> for DexError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound(k) => DexError::NotFound(k),
            GatewayError::Network(_) | GatewayError::Status { .. } => DexError::Network(e.to_string()),
            GatewayError::Parse(m) => DexError::Internal(m),
        }
    }
}

impl From<LoadError> for DexError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::InitialCount(g) => DexError::Network(format!("initial count: {}", g)),
            LoadError::InProgress => DexError::Validation(e.to_string()),
        }
    }
}

impl From<QueryError> for DexError {
    fn from(e: QueryError) -> Self { DexError::Validation(e.to_string()) }
}

/// Bulk-load stream item. `Loaded` or `Failed` is always the last event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LoadEvent {
    Progress(LoadProgress),
    Loaded(Arc<Collection>),
    Failed(DexError),
}

/// Declarative Dex API surface.
#[async_trait::async_trait]
pub trait DexApi: Send + Sync {
    /// One listing page and its batch-fetched entities. Missing entities are omitted.
    async fn get_page(&self, offset: u32, limit: u32) -> DexResult<PageResult>;

    async fn get_entity(&self, key: EntityKey) -> DexResult<Arc<Entity>>;

    /// Exact lookup from user input (name or number).
    async fn search(&self, query: &str) -> DexResult<Arc<Entity>>;

    /// Species metadata; empty when unavailable.
    async fn species(&self, id: u32) -> DexResult<Arc<SpeciesMeta>>;

    async fn ability_description(&self, name: &str, locale: &str) -> DexResult<String>;

    async fn get_batch(&self, ids: &[u32]) -> DexResult<Vec<Arc<Entity>>>;

    /// Start (or join) the bulk load and stream its progress.
    async fn load_all(&self) -> DexResult<StreamHandle<LoadEvent>>;

    fn apply_filters(&self, collection: &Collection, spec: &FilterSpec) -> Vec<Arc<Entity>> {
        dex_search::apply_filters(&collection.items, spec)
    }

    async fn settings(&self) -> DexResult<Settings>;
}

// ----------------- In-process implementation -----------------

/// In-process implementation that calls internal crates directly.
pub struct InProcApi {
    gateway: Arc<Gateway>,
    aggregator: Arc<Aggregator>,
    settings: Settings,
}

impl InProcApi {
    pub fn new(gateway: Arc<Gateway>, aggregator: Arc<Aggregator>, settings: Settings) -> Self {
        Self { gateway, aggregator, settings }
    }

    /// Wire an HTTP gateway and aggregator from `DEX_*` environment settings.
    pub fn from_env() -> DexResult<Self> {
        let gcfg = GatewayConfig::from_env();
        let bcfg = BulkConfig::from_env();
        let gateway = Arc::new(Gateway::from_config(&gcfg)?);
        let aggregator = Arc::new(Aggregator::new(Arc::clone(&gateway), bcfg));
        Ok(Self::new(gateway, aggregator, Settings::new(&gcfg, &bcfg)))
    }

    pub fn gateway(&self) -> &Arc<Gateway> { &self.gateway }
    pub fn aggregator(&self) -> &Arc<Aggregator> { &self.aggregator }
}

/// Order fetched entities by their position in `ids`.
fn in_request_order(ids: &[u32], mut entities: Vec<Arc<Entity>>) -> Vec<Arc<Entity>> {
    let pos: HashMap<u32, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    entities.sort_by_key(|e| pos.get(&e.id).copied().unwrap_or(usize::MAX));
    entities
}

fn event_for(state: &LoadState, aggregator: &Aggregator) -> Option<LoadEvent> {
    match state {
        LoadState::Idle => None,
        LoadState::Loading(p) => Some(LoadEvent::Progress(*p)),
        LoadState::Loaded(_) => Some(LoadEvent::Loaded(aggregator.current())),
        LoadState::Error(m) => Some(LoadEvent::Failed(DexError::Network(m.clone()))),
    }
}

#[async_trait::async_trait]
impl DexApi for InProcApi {
    async fn get_page(&self, offset: u32, limit: u32) -> DexResult<PageResult> {
        if limit == 0 {
            return Err(DexError::Validation("limit must be at least 1".into()));
        }
        let t0 = Instant::now();
        info!(offset, limit, "api: get_page start");
        let page = self.gateway.fetch_page(offset, limit).await?;
        let ids = page.ids();
        let entities = in_request_order(&ids, dex_store::fetch_batch(&self.gateway, &ids).await);
        metrics::histogram!("api_get_page_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        info!(listed = ids.len(), fetched = entities.len(), took_ms = %t0.elapsed().as_millis(), "api: get_page ok");
        Ok(PageResult { page, entities })
    }

    async fn get_entity(&self, key: EntityKey) -> DexResult<Arc<Entity>> {
        let t0 = Instant::now();
        let e = self.gateway.fetch_entity(key.clone()).await?;
        info!(key = %key, id = e.id, took_ms = %t0.elapsed().as_millis(), "api: get_entity ok");
        Ok(e)
    }

    async fn search(&self, query: &str) -> DexResult<Arc<Entity>> {
        let t0 = Instant::now();
        let e = self.gateway.search(query).await?;
        info!(query = %query, id = e.id, took_ms = %t0.elapsed().as_millis(), "api: search ok");
        Ok(e)
    }

    async fn species(&self, id: u32) -> DexResult<Arc<SpeciesMeta>> {
        Ok(self.gateway.fetch_species_meta(id).await)
    }

    async fn ability_description(&self, name: &str, locale: &str) -> DexResult<String> {
        Ok(self.gateway.fetch_ability_description(name, locale).await)
    }

    async fn get_batch(&self, ids: &[u32]) -> DexResult<Vec<Arc<Entity>>> {
        let t0 = Instant::now();
        let out = in_request_order(ids, dex_store::fetch_batch(&self.gateway, ids).await);
        info!(requested = ids.len(), fetched = out.len(), took_ms = %t0.elapsed().as_millis(), "api: get_batch ok");
        Ok(out)
    }

    async fn load_all(&self) -> DexResult<StreamHandle<LoadEvent>> {
        let (tx, rx) = mpsc::channel::<LoadEvent>(self.settings.queue_cap.max(1));
        let mut state_rx = self.aggregator.subscribe();
        let started = self.aggregator.start().is_some();
        info!(started, state = ?self.aggregator.state(), "api: load_all");
        let aggregator = Arc::clone(&self.aggregator);
        let handle = tokio::spawn(async move {
            let t0 = Instant::now();
            let mut last: Option<LoadState> = None;
            loop {
                let state = state_rx.borrow_and_update().clone();
                if last.as_ref() != Some(&state) {
                    if let Some(ev) = event_for(&state, &aggregator) {
                        let terminal = !matches!(ev, LoadEvent::Progress(_));
                        if tx.send(ev).await.is_err() {
                            debug!("api: load_all receiver dropped");
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    last = Some(state);
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
            info!(ran_ms = %t0.elapsed().as_millis(), "api: load_all stream ended");
        });
        Ok(StreamHandle { rx, cancel: CancelHandle { task: Some(handle) } })
    }

    async fn settings(&self) -> DexResult<Settings> { Ok(self.settings.clone()) }
}

// ----------------- Streaming primitives -----------------

/// Cancellation handle that aborts the underlying task.
pub struct CancelHandle { task: Option<tokio::task::JoinHandle<()>> }

impl CancelHandle { pub fn cancel(mut self) { if let Some(h) = self.task.take() { h.abort(); } } }

/// Generic stream handle used by API streaming endpoints.
pub struct StreamHandle<T> { pub rx: mpsc::Receiver<T>, pub cancel: CancelHandle }

// ----------------- Mock implementation -----------------

/// Simple in-memory mock implementation for tests.
#[derive(Default)]
pub struct MockApi {
    pub page: Option<Page>,
    pub entities: Vec<Arc<Entity>>,
    pub species: HashMap<u32, Arc<SpeciesMeta>>,
    pub descriptions: HashMap<(String, String), String>,
    pub settings: Settings,
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    fn find(&self, key: &EntityKey) -> Option<Arc<Entity>> {
        self.entities
            .iter()
            .find(|e| match key {
                EntityKey::Id(id) => e.id == *id,
                EntityKey::Name(n) => e.name == *n,
            })
            .cloned()
    }
}

#[async_trait::async_trait]
impl DexApi for MockApi {
    async fn get_page(&self, _offset: u32, _limit: u32) -> DexResult<PageResult> {
        let page = self.page.clone().ok_or_else(|| DexError::NotFound("no page".into()))?;
        let ids = page.ids();
        let entities = ids.iter().filter_map(|id| self.find(&EntityKey::Id(*id))).collect();
        Ok(PageResult { page: Arc::new(page), entities })
    }

    async fn get_entity(&self, key: EntityKey) -> DexResult<Arc<Entity>> {
        self.find(&key).ok_or_else(|| DexError::NotFound(key.to_string()))
    }

    async fn search(&self, query: &str) -> DexResult<Arc<Entity>> {
        let key = EntityKey::parse(query);
        self.find(&key).ok_or_else(|| DexError::NotFound(query.trim().to_string()))
    }

    async fn species(&self, id: u32) -> DexResult<Arc<SpeciesMeta>> {
        Ok(self.species.get(&id).cloned().unwrap_or_else(|| Arc::new(SpeciesMeta::empty())))
    }

    async fn ability_description(&self, name: &str, locale: &str) -> DexResult<String> {
        Ok(self.descriptions.get(&(name.to_string(), locale.to_string())).cloned().unwrap_or_default())
    }

    async fn get_batch(&self, ids: &[u32]) -> DexResult<Vec<Arc<Entity>>> {
        Ok(ids.iter().filter_map(|id| self.find(&EntityKey::Id(*id))).collect())
    }

    async fn load_all(&self) -> DexResult<StreamHandle<LoadEvent>> {
        let n = self.entities.len() as u32;
        let (tx, rx) = mpsc::channel(2);
        tx.try_send(LoadEvent::Progress(LoadProgress { current: n, total: n })).ok();
        let coll = Collection { epoch: 1, total: n, items: self.entities.clone() };
        tx.try_send(LoadEvent::Loaded(Arc::new(coll))).ok();
        Ok(StreamHandle { rx, cancel: CancelHandle { task: None } })
    }

    async fn settings(&self) -> DexResult<Settings> { Ok(self.settings.clone()) }
}
