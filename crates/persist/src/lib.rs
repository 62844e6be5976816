//! Dex persistence: device-local key/value preferences (favorites, language).
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use tracing::debug;

pub const FAVORITES_KEY: &str = "favorites";
pub const LANGUAGE_KEY: &str = "language";
pub const DEFAULT_LANGUAGE: &str = "en";

/// String key/value store.
pub trait PrefStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-backed store. Simple, synchronous; preference writes are rare.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("DEX_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS prefs (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                ts    INTEGER NOT NULL
            )",
            [],
        )
        .context("creating prefs table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "persist: opened");
        Ok(Self { db: Mutex::new(db) })
    }
}

impl PrefStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let started = std::time::Instant::now();
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = db.prepare("SELECT value FROM prefs WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        let out = match rows.next()? {
            Some(row) => Some(row.get::<_, String>(0)?),
            None => None,
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let started = std::time::Instant::now();
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.execute(
            "INSERT INTO prefs(key, value, ts) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, ts = excluded.ts",
            (key, value, now_ts()),
        )
        .with_context(|| format!("writing pref {}", key))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.execute("DELETE FROM prefs WHERE key = ?1", [key])
            .with_context(|| format!("removing pref {}", key))?;
        Ok(())
    }
}

/// Process-local store for tests and `--no-persist` runs.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl PrefStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}

/// Favorite entity ids, stored as a JSON array under `favorites`.
pub struct Favorites<'a> {
    store: &'a dyn PrefStore,
}

impl<'a> Favorites<'a> {
    pub fn new(store: &'a dyn PrefStore) -> Self { Self { store } }

    /// Ids in insertion order. An unreadable value reads as empty.
    pub fn list(&self) -> Result<Vec<u32>> {
        let Some(raw) = self.store.get(FAVORITES_KEY)? else { return Ok(Vec::new()) };
        Ok(serde_json::from_str::<Vec<u32>>(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "persist: favorites unreadable; starting empty");
            Vec::new()
        }))
    }

    pub fn contains(&self, id: u32) -> Result<bool> { Ok(self.list()?.contains(&id)) }

    /// Returns false when `id` was already a favorite.
    pub fn add(&self, id: u32) -> Result<bool> {
        let mut ids = self.list()?;
        if ids.contains(&id) {
            return Ok(false);
        }
        ids.push(id);
        self.save(&ids)?;
        Ok(true)
    }

    /// Returns false when `id` was not a favorite.
    pub fn remove(&self, id: u32) -> Result<bool> {
        let mut ids = self.list()?;
        let before = ids.len();
        ids.retain(|x| *x != id);
        if ids.len() == before {
            return Ok(false);
        }
        self.save(&ids)?;
        Ok(true)
    }

    /// Add when absent, remove when present. Returns the new membership.
    pub fn toggle(&self, id: u32) -> Result<bool> {
        if self.remove(id)? {
            return Ok(false);
        }
        self.add(id)
    }

    fn save(&self, ids: &[u32]) -> Result<()> {
        let raw = serde_json::to_string(ids).context("encoding favorites")?;
        self.store.set(FAVORITES_KEY, &raw)
    }
}

pub fn language(store: &dyn PrefStore) -> Result<String> {
    Ok(store.get(LANGUAGE_KEY)?.filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()))
}

pub fn set_language(store: &dyn PrefStore, locale: &str) -> Result<()> {
    store.set(LANGUAGE_KEY, locale.trim())
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".dex");
        let _ = std::fs::create_dir_all(&p);
        p.push("dex.db");
        return p.to_string_lossy().to_string();
    }
    "dex.db".to_string()
}

pub fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}
