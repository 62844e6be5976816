//! Dex core types: catalog entities, list pages, species metadata and load progress.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod compare;
pub mod filter;

pub use compare::Comparison;
pub use filter::{AttributeRange, AttributeRanges, FilterSpec, Grouping, RangedAttribute, GROUPINGS};

/// The six base stats every entity carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Attribute {
    Hp,
    Attack,
    Defense,
    SpecialAttack,
    SpecialDefense,
    Speed,
}

impl Attribute {
    pub const ALL: [Attribute; 6] = [
        Attribute::Hp,
        Attribute::Attack,
        Attribute::Defense,
        Attribute::SpecialAttack,
        Attribute::SpecialDefense,
        Attribute::Speed,
    ];

    /// Remote stat name, e.g. `special-attack`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Hp => "hp",
            Attribute::Attack => "attack",
            Attribute::Defense => "defense",
            Attribute::SpecialAttack => "special-attack",
            Attribute::SpecialDefense => "special-defense",
            Attribute::Speed => "speed",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeValue {
    pub attribute: Attribute,
    pub base: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PhysicalTraits {
    /// Decimetres.
    pub height: u32,
    /// Hectograms.
    pub weight: u32,
    pub base_experience: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityRef {
    pub name: String,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ImageRefs {
    pub front_default: Option<String>,
    pub front_shiny: Option<String>,
    pub official_artwork: Option<String>,
    pub dream_world: Option<String>,
}

/// One catalog item. Built once per fetch and shared as `Arc<Entity>`; a refresh
/// replaces the whole value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub id: u32,
    /// Lower-case canonical name.
    pub name: String,
    /// Category tags in slot order (one or two).
    pub categories: SmallVec<[String; 2]>,
    /// Base stats in the order the remote listed them.
    pub attributes: SmallVec<[AttributeValue; 6]>,
    pub traits: PhysicalTraits,
    pub abilities: Vec<AbilityRef>,
    pub images: ImageRefs,
    pub species_url: Option<String>,
}

impl Entity {
    /// First base value recorded for `attribute`.
    pub fn attribute(&self, attribute: Attribute) -> Option<u16> {
        self.attributes.iter().find(|a| a.attribute == attribute).map(|a| a.base)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// Sum of all base stats.
    pub fn attribute_total(&self) -> u32 {
        self.attributes.iter().map(|a| a.base as u32).sum()
    }

    /// `#025` style display id.
    pub fn display_id(&self) -> String { format!("#{:03}", self.id) }
}

/// Lookup key for a single entity: numeric id or lower-case name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    Id(u32),
    Name(String),
}

impl EntityKey {
    /// All-digit input becomes an id; anything else a lower-cased name.
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = t.parse::<u32>() {
                return EntityKey::Id(id);
            }
        }
        EntityKey::Name(t.to_ascii_lowercase())
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, EntityKey::Name(n) if n.is_empty())
    }
}

impl From<u32> for EntityKey {
    fn from(id: u32) -> Self { EntityKey::Id(id) }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self { EntityKey::parse(s) }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Id(id) => write!(f, "{}", id),
            EntityKey::Name(n) => f.write_str(n),
        }
    }
}

static TRAILING_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d+)/?$").expect("static regex"));

/// Extract the trailing numeric segment of a resource url (`.../pokemon/25/`).
pub fn id_from_url(url: &str) -> Option<u32> {
    TRAILING_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|id| *id > 0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageEntry {
    pub name: String,
    pub url: String,
}

impl PageEntry {
    pub fn id(&self) -> Option<u32> { id_from_url(&self.url) }
}

/// One page of the remote listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Page {
    pub count: u32,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<PageEntry>,
}

impl Page {
    /// Ids of the listed entries, skipping urls without one.
    pub fn ids(&self) -> Vec<u32> { self.results.iter().filter_map(PageEntry::id).collect() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalizedText {
    pub text: String,
    pub language: String,
}

/// Optional descriptive metadata for an entity's species.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SpeciesMeta {
    pub flavor_text_entries: Vec<LocalizedText>,
    pub genera: Vec<LocalizedText>,
    pub habitat: Option<String>,
    pub evolution_chain_url: String,
}

impl SpeciesMeta {
    /// Well-formed metadata with nothing in it.
    pub fn empty() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool {
        self.flavor_text_entries.is_empty() && self.genera.is_empty() && self.habitat.is_none()
    }

    /// Flavor text for `locale`, falling back to English.
    pub fn flavor_text(&self, locale: &str) -> Option<String> {
        pick_localized(&self.flavor_text_entries, locale).map(normalize_text)
    }

    /// Genus ("Seed Pokémon") for `locale`, falling back to English.
    pub fn genus(&self, locale: &str) -> Option<String> {
        pick_localized(&self.genera, locale).map(|s| s.to_string())
    }
}

fn pick_localized<'a>(entries: &'a [LocalizedText], locale: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| e.language == locale)
        .or_else(|| entries.iter().find(|e| e.language == "en"))
        .map(|e| e.text.as_str())
}

/// Replace newline, carriage-return and form-feed with spaces and trim.
pub fn normalize_text(s: &str) -> String {
    s.chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\u{000C}') { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Bulk-load progress. `current` never decreases during one load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LoadProgress {
    pub current: u32,
    pub total: u32,
}

impl LoadProgress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 { return 0.0; }
        (self.current as f32 / self.total as f32 * 100.0).min(100.0)
    }
}

/// In-memory collection produced by a bulk load. `epoch` advances on every swap.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Collection {
    pub epoch: u64,
    /// Authoritative remote count; `items.len()` may be smaller.
    pub total: u32,
    pub items: Vec<Arc<Entity>>,
}

pub mod prelude {
    pub use super::{
        Attribute, AttributeValue, Collection, Entity, EntityKey, LoadProgress, Page, PageEntry,
        SpeciesMeta,
    };
    pub use super::filter::{AttributeRange, FilterSpec, RangedAttribute};
}
