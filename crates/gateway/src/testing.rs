//! In-memory transport for tests: canned responses, optional latency, and
//! accounting of calls and peak concurrency.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};

use crate::{GatewayError, RawResponse, Transport};

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<FxHashMap<String, RawResponse>>,
    failures: Mutex<FxHashSet<String>>,
    calls: Mutex<FxHashMap<String, usize>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); }
}

impl FakeTransport {
    pub fn new() -> Self { Self::default() }

    /// Every request sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn route_json(&self, path: &str, body: Value) {
        let body = serde_json::to_vec(&body).unwrap_or_default();
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_string(), RawResponse { status: 200, body });
    }

    pub fn route_status(&self, path: &str, status: u16) {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_string(), RawResponse { status, body: Vec::new() });
    }

    /// Requests for `path` fail at the transport level.
    pub fn fail(&self, path: &str) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_string());
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).values().sum()
    }

    /// Highest number of requests observed awaiting a response at once.
    pub fn peak_in_flight(&self) -> usize { self.peak.load(Ordering::SeqCst) }

    /// Route one listing page.
    pub fn route_page(&self, offset: u32, limit: u32, count: u32, entries: &[(u32, &str)]) {
        self.route_json(&format!("/pokemon?offset={}&limit={}", offset, limit), page_json(count, entries));
    }

    /// Route an entity by id; it is also reachable by name.
    pub fn route_entity(&self, body: Value) {
        let id = body["id"].as_u64().unwrap_or(0);
        let name = body["name"].as_str().unwrap_or("").to_string();
        self.route_json(&format!("/pokemon/{}", id), body.clone());
        if !name.is_empty() {
            self.route_json(&format!("/pokemon/{}", name), body);
        }
    }

    /// Listing pages used by a bulk load (`limit=1` and `limit=count`) plus one
    /// default entity per listed id.
    pub fn seed_catalog(&self, entries: &[(u32, &str)]) {
        let count = entries.len() as u32;
        self.route_page(0, 1, count, &entries[..entries.len().min(1)]);
        self.route_page(0, count, count, entries);
        for (id, name) in entries {
            self.route_entity(entity_json(*id, name, &["normal"], [50, 50, 50, 50, 50, 50]));
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str) -> Result<RawResponse, GatewayError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = Active(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner).entry(path.to_string()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failures.lock().unwrap_or_else(PoisonError::into_inner).contains(path) {
            return Err(GatewayError::Network(format!("connection reset: {}", path)));
        }
        let routed = self.routes.lock().unwrap_or_else(PoisonError::into_inner).get(path).cloned();
        Ok(routed.unwrap_or(RawResponse { status: 404, body: b"Not Found".to_vec() }))
    }
}

/// Listing payload with PokeAPI-style urls.
pub fn page_json(count: u32, entries: &[(u32, &str)]) -> Value {
    json!({
        "count": count,
        "next": null,
        "previous": null,
        "results": entries
            .iter()
            .map(|(id, name)| json!({"name": name, "url": format!("https://pokeapi.co/api/v2/pokemon/{}/", id)}))
            .collect::<Vec<_>>(),
    })
}

/// Entity payload; `stats` is hp, attack, defense, special-attack, special-defense, speed.
pub fn entity_json(id: u32, name: &str, types: &[&str], stats: [u16; 6]) -> Value {
    let names = ["hp", "attack", "defense", "special-attack", "special-defense", "speed"];
    json!({
        "id": id,
        "name": name,
        "types": types
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"slot": i + 1, "type": {"name": t}}))
            .collect::<Vec<_>>(),
        "stats": names
            .iter()
            .zip(stats)
            .map(|(n, b)| json!({"base_stat": b, "stat": {"name": n}}))
            .collect::<Vec<_>>(),
        "height": 7,
        "weight": 69,
        "base_experience": 64,
        "abilities": [{"ability": {"name": "overgrow"}, "is_hidden": false}],
        "sprites": {"front_default": null, "front_shiny": null, "other": null},
        "species": {"url": format!("https://pokeapi.co/api/v2/pokemon-species/{}/", id)},
    })
}
