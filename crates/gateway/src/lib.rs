//! Dex gateway: the only component that talks to the remote catalog API.
//!
//! Every response goes through a `Cache` and every network call through a shared
//! semaphore that bounds concurrent requests across all callers.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dex_core::{Entity, EntityKey, Page, SpeciesMeta};
use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub mod cache;
pub mod config;
pub mod transport;
mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{Cache, UnboundedCache};
pub use config::GatewayConfig;
pub use transport::{HttpTransport, RawResponse, Transport};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("network: {0}")]
    Network(String),
    #[error("status {status} for {path}")]
    Status { status: u16, path: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("parse: {0}")]
    Parse(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool { matches!(self, GatewayError::NotFound(_)) }

    /// Transport failure or non-success status.
    pub fn is_network(&self) -> bool { matches!(self, GatewayError::Network(_) | GatewayError::Status { .. }) }
}

/// Localized text supplied from outside the gateway (e.g. curated translation tables).
pub trait LocalizedLookup: Send + Sync {
    fn ability_description(&self, name: &str, locale: &str) -> Option<String>;
}

type PageKey = (u32, u32);
type AbilityKey = (String, String);

pub struct Gateway {
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    in_flight: AtomicUsize,
    pages: Box<dyn Cache<PageKey, Arc<Page>>>,
    entities: Box<dyn Cache<EntityKey, Arc<Entity>>>,
    species: Box<dyn Cache<u32, Arc<SpeciesMeta>>>,
    abilities: Box<dyn Cache<AbilityKey, String>>,
    lookup: Option<Arc<dyn LocalizedLookup>>,
}

/// Decrements the in-flight count even when the request future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let n = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        gauge!("gateway_in_flight", n as f64);
    }
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            transport,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            in_flight: AtomicUsize::new(0),
            pages: Box::new(UnboundedCache::new()),
            entities: Box::new(UnboundedCache::new()),
            species: Box::new(UnboundedCache::new()),
            abilities: Box::new(UnboundedCache::new()),
            lookup: None,
        }
    }

    /// HTTP gateway built from configuration.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(cfg.base_url.clone(), Duration::from_secs(cfg.timeout_secs))?;
        info!(base_url = %cfg.base_url, max_in_flight = cfg.max_in_flight, "gateway: http transport ready");
        Ok(Self::new(Arc::new(transport), cfg.max_in_flight))
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn LocalizedLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Swap the entity cache implementation (e.g. for a bounded policy).
    pub fn with_entity_cache(mut self, cache: Box<dyn Cache<EntityKey, Arc<Entity>>>) -> Self {
        self.entities = cache;
        self
    }

    pub fn max_in_flight(&self) -> usize { self.max_in_flight }

    /// Transport requests currently awaiting a response.
    pub fn in_flight(&self) -> usize { self.in_flight.load(Ordering::SeqCst) }

    pub fn cached_entity_keys(&self) -> usize { self.entities.len() }

    async fn request(&self, path: &str) -> Result<RawResponse, GatewayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Network("gateway closed".into()))?;
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        gauge!("gateway_in_flight", n as f64);
        let t0 = Instant::now();
        let res = self.transport.get(path).await;
        let outcome = match &res {
            Ok(r) if r.is_success() => "ok",
            Ok(r) if r.status == 404 => "not_found",
            Ok(_) => "status",
            Err(_) => "error",
        };
        counter!("gateway_requests_total", 1u64, "outcome" => outcome);
        histogram!("gateway_request_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        debug!(path = %path, outcome, took_ms = %t0.elapsed().as_millis(), "gateway: request done");
        res
    }

    /// One page of the listing, cached by `(offset, limit)`.
    pub async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Arc<Page>, GatewayError> {
        if let Some(page) = self.pages.get(&(offset, limit)) {
            counter!("gateway_cache_hits_total", 1u64, "kind" => "page");
            return Ok(page);
        }
        let path = format!("/pokemon?offset={}&limit={}", offset, limit);
        let resp = self.request(&path).await?;
        if !resp.is_success() {
            warn!(path = %path, status = resp.status, "gateway: page failed");
            return Err(GatewayError::Status { status: resp.status, path });
        }
        let page = Arc::new(wire::parse_page(&resp.body)?);
        self.pages.set((offset, limit), Arc::clone(&page));
        info!(offset, limit, count = page.count, results = page.results.len(), "gateway: page ok");
        Ok(page)
    }

    /// One full entity. Successful fetches are cached under both id and name so a
    /// later lookup by the other key shares the same `Arc`.
    pub async fn fetch_entity(&self, key: impl Into<EntityKey>) -> Result<Arc<Entity>, GatewayError> {
        let key = key.into();
        if key.is_blank() {
            return Err(GatewayError::NotFound("(empty key)".into()));
        }
        if let Some(e) = self.entities.get(&key) {
            counter!("gateway_cache_hits_total", 1u64, "kind" => "entity");
            return Ok(e);
        }
        let path = format!("/pokemon/{}", key);
        let resp = self.request(&path).await.map_err(|e| {
            debug!(key = %key, error = %e, "gateway: entity request failed");
            e
        })?;
        if resp.status == 404 {
            return Err(GatewayError::NotFound(key.to_string()));
        }
        if !resp.is_success() {
            warn!(key = %key, status = resp.status, "gateway: entity failed");
            return Err(GatewayError::Status { status: resp.status, path });
        }
        let fetched = Arc::new(wire::parse_entity(&resp.body)?);
        Ok(self.remember(&key, fetched))
    }

    fn remember(&self, requested: &EntityKey, fetched: Arc<Entity>) -> Arc<Entity> {
        let shared = self.entities.get_or_insert(EntityKey::Id(fetched.id), fetched);
        self.entities.set(EntityKey::Name(shared.name.clone()), Arc::clone(&shared));
        if *requested != EntityKey::Id(shared.id) {
            self.entities.set(requested.clone(), Arc::clone(&shared));
        }
        shared
    }

    /// Exact lookup by user-typed name or number. Any failure reads as not found.
    pub async fn search(&self, query: &str) -> Result<Arc<Entity>, GatewayError> {
        let q = query.trim();
        self.fetch_entity(EntityKey::parse(q)).await.map_err(|e| {
            debug!(query = %q, error = %e, "gateway: search miss");
            GatewayError::NotFound(q.to_string())
        })
    }

    /// Species metadata; on any failure an empty value is returned and cached.
    pub async fn fetch_species_meta(&self, id: u32) -> Arc<SpeciesMeta> {
        if let Some(m) = self.species.get(&id) {
            counter!("gateway_cache_hits_total", 1u64, "kind" => "species");
            return m;
        }
        let path = format!("/pokemon-species/{}", id);
        let meta = match self.request(&path).await {
            Ok(r) if r.is_success() => wire::parse_species(&r.body).unwrap_or_else(|e| {
                warn!(id, error = %e, "gateway: species payload unreadable");
                SpeciesMeta::empty()
            }),
            Ok(r) => {
                debug!(id, status = r.status, "gateway: species unavailable");
                SpeciesMeta::empty()
            }
            Err(e) => {
                warn!(id, error = %e, "gateway: species request failed");
                SpeciesMeta::empty()
            }
        };
        let meta = Arc::new(meta);
        self.species.set(id, Arc::clone(&meta));
        meta
    }

    /// Short ability description for `locale`; empty on any failure. Cached per `(name, locale)`.
    pub async fn fetch_ability_description(&self, name: &str, locale: &str) -> String {
        let name = name.trim().to_ascii_lowercase();
        let key = (name.clone(), locale.to_string());
        if let Some(d) = self.abilities.get(&key) {
            counter!("gateway_cache_hits_total", 1u64, "kind" => "ability");
            return d;
        }
        if let Some(text) = self.lookup.as_ref().and_then(|l| l.ability_description(&name, locale)) {
            let text = dex_core::normalize_text(&text);
            self.abilities.set(key, text.clone());
            return text;
        }
        let description = if name.is_empty() {
            String::new()
        } else {
            let path = format!("/ability/{}", name);
            match self.request(&path).await {
                Ok(r) if r.is_success() => match wire::parse_ability(&r.body) {
                    Ok(p) => wire::select_description(&p, locale),
                    Err(e) => {
                        warn!(ability = %name, error = %e, "gateway: ability payload unreadable");
                        String::new()
                    }
                },
                Ok(r) => {
                    debug!(ability = %name, status = r.status, "gateway: ability unavailable");
                    String::new()
                }
                Err(e) => {
                    warn!(ability = %name, error = %e, "gateway: ability request failed");
                    String::new()
                }
            }
        };
        self.abilities.set(key, description.clone());
        description
    }
}
