//! Declarative filter specification and the generation grouping table.
//!
//! A `FilterSpec` has three independent dimensions:
//! - categories: set of category tags (empty = unconstrained)
//! - groupings: set of grouping ids, each an identifier interval (empty = unconstrained)
//! - ranges: inclusive bounds on hp/attack/defense/speed (default 0..=255)
//!
//! Evaluation lives in `dex-search`; this module only describes the filter.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

pub const STAT_FLOOR: u16 = 0;
pub const STAT_CEIL: u16 = 255;

/// Inclusive bound on one base stat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeRange {
    pub min: u16,
    pub max: u16,
}

impl Default for AttributeRange {
    fn default() -> Self { Self { min: STAT_FLOOR, max: STAT_CEIL } }
}

impl AttributeRange {
    pub fn new(min: u16, max: u16) -> Self { Self { min, max } }

    /// A range narrows the result only when it moved off the full 0..=255 span.
    pub fn is_constraining(&self) -> bool { self.min > STAT_FLOOR || self.max < STAT_CEIL }

    pub fn contains(&self, v: u16) -> bool { v >= self.min && v <= self.max }
}

/// The four stats a filter can bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RangedAttribute {
    Hp,
    Attack,
    Defense,
    Speed,
}

impl RangedAttribute {
    pub const ALL: [RangedAttribute; 4] =
        [RangedAttribute::Hp, RangedAttribute::Attack, RangedAttribute::Defense, RangedAttribute::Speed];

    pub fn as_str(&self) -> &'static str {
        match self {
            RangedAttribute::Hp => "hp",
            RangedAttribute::Attack => "attack",
            RangedAttribute::Defense => "defense",
            RangedAttribute::Speed => "speed",
        }
    }

    /// Accepts the long name and the usual short forms (`atk`, `def`, `spe`).
    pub fn from_token(tok: &str) -> Option<Self> {
        match tok.to_ascii_lowercase().as_str() {
            "hp" => Some(RangedAttribute::Hp),
            "attack" | "atk" => Some(RangedAttribute::Attack),
            "defense" | "def" => Some(RangedAttribute::Defense),
            "speed" | "spe" | "spd" => Some(RangedAttribute::Speed),
            _ => None,
        }
    }
}

impl fmt::Display for RangedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AttributeRanges {
    pub hp: AttributeRange,
    pub attack: AttributeRange,
    pub defense: AttributeRange,
    pub speed: AttributeRange,
}

impl AttributeRanges {
    pub fn get(&self, attr: RangedAttribute) -> AttributeRange {
        match attr {
            RangedAttribute::Hp => self.hp,
            RangedAttribute::Attack => self.attack,
            RangedAttribute::Defense => self.defense,
            RangedAttribute::Speed => self.speed,
        }
    }

    pub fn set(&mut self, attr: RangedAttribute, range: AttributeRange) {
        match attr {
            RangedAttribute::Hp => self.hp = range,
            RangedAttribute::Attack => self.attack = range,
            RangedAttribute::Defense => self.defense = range,
            RangedAttribute::Speed => self.speed = range,
        }
    }

    pub fn any_constraining(&self) -> bool {
        RangedAttribute::ALL.iter().any(|a| self.get(*a).is_constraining())
    }
}

/// Declarative, stateless multi-dimensional filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FilterSpec {
    /// Lower-cased category tags.
    #[serde(deserialize_with = "lowercase_set")]
    pub categories: BTreeSet<String>,
    pub groupings: BTreeSet<u8>,
    pub ranges: AttributeRanges,
}

impl FilterSpec {
    pub fn new() -> Self { Self::default() }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into().to_ascii_lowercase());
        self
    }

    pub fn with_grouping(mut self, grouping: u8) -> Self {
        self.groupings.insert(grouping);
        self
    }

    pub fn with_range(mut self, attr: RangedAttribute, min: u16, max: u16) -> Self {
        self.ranges.set(attr, AttributeRange::new(min, max));
        self
    }

    /// True when no dimension narrows the collection.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.groupings.is_empty() && !self.ranges.any_constraining()
    }
}

fn lowercase_set<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
    let raw = BTreeSet::<String>::deserialize(d)?;
    Ok(raw.into_iter().map(|s| s.to_ascii_lowercase()).collect())
}

/// A generational bucket: closed id interval `[lo, hi]`, `hi = None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grouping {
    pub id: u8,
    pub label: &'static str,
    pub lo: u32,
    pub hi: Option<u32>,
}

impl Grouping {
    pub fn contains(&self, id: u32) -> bool {
        id >= self.lo && self.hi.map(|hi| id <= hi).unwrap_or(true)
    }

    pub fn interval(&self) -> (u32, u32) { (self.lo, self.hi.unwrap_or(u32::MAX)) }
}

pub const GROUPINGS: [Grouping; 10] = [
    Grouping { id: 1, label: "Kanto (I)", lo: 1, hi: Some(151) },
    Grouping { id: 2, label: "Johto (II)", lo: 152, hi: Some(251) },
    Grouping { id: 3, label: "Hoenn (III)", lo: 252, hi: Some(386) },
    Grouping { id: 4, label: "Sinnoh (IV)", lo: 387, hi: Some(493) },
    Grouping { id: 5, label: "Unova (V)", lo: 494, hi: Some(649) },
    Grouping { id: 6, label: "Kalos (VI)", lo: 650, hi: Some(721) },
    Grouping { id: 7, label: "Alola (VII)", lo: 722, hi: Some(809) },
    Grouping { id: 8, label: "Galar (VIII)", lo: 810, hi: Some(905) },
    Grouping { id: 9, label: "Paldea (IX)", lo: 906, hi: Some(1025) },
    Grouping { id: 10, label: "Special forms", lo: 1026, hi: None },
];

/// Catch-all used for grouping ids outside the table.
const ANY_GROUPING: Grouping = Grouping { id: 0, label: "All", lo: 1, hi: None };

/// Resolve a grouping id; unknown ids cover every valid identifier.
pub fn grouping(id: u8) -> Grouping {
    GROUPINGS.iter().copied().find(|g| g.id == id).unwrap_or(ANY_GROUPING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_boundaries() {
        let g1 = grouping(1);
        assert!(g1.contains(1));
        assert!(g1.contains(151));
        assert!(!g1.contains(152));
        assert!(grouping(2).contains(152));
        let special = grouping(10);
        assert!(special.contains(1026));
        assert!(special.contains(10_277));
        assert!(!special.contains(1025));
        assert_eq!(special.interval(), (1026, u32::MAX));
    }

    #[test]
    fn unknown_grouping_covers_everything() {
        let g = grouping(42);
        assert!(g.contains(1));
        assert!(g.contains(50_000));
        assert!(!g.contains(0));
    }

    #[test]
    fn range_defaults_do_not_constrain() {
        let spec = FilterSpec::new();
        assert!(spec.is_empty());
        assert!(!spec.ranges.any_constraining());
        let spec = FilterSpec::new().with_range(RangedAttribute::Hp, 0, 254);
        assert!(spec.ranges.any_constraining());
        assert!(!spec.is_empty());
        let spec = FilterSpec::new().with_range(RangedAttribute::Speed, 1, 255);
        assert!(spec.ranges.any_constraining());
    }

    #[test]
    fn spec_serializes_with_lowercase_names() {
        let spec = FilterSpec::new().with_category("Fire").with_grouping(1).with_range(RangedAttribute::Hp, 50, 100);
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["categories"][0], "fire");
        assert_eq!(v["groupings"][0], 1);
        assert_eq!(v["ranges"]["hp"]["min"], 50);
        assert_eq!(v["ranges"]["speed"]["max"], 255);
    }

    #[test]
    fn deserialized_categories_are_lowercased() {
        let spec: FilterSpec = serde_json::from_value(serde_json::json!({
            "categories": ["Fire", "FLYING"],
            "groupings": [1],
            "ranges": FilterSpec::new().ranges,
        }))
        .unwrap();
        assert_eq!(spec, FilterSpec::new().with_category("fire").with_category("flying").with_grouping(1));
    }

    #[test]
    fn short_stat_tokens() {
        assert_eq!(RangedAttribute::from_token("ATK"), Some(RangedAttribute::Attack));
        assert_eq!(RangedAttribute::from_token("def"), Some(RangedAttribute::Defense));
        assert_eq!(RangedAttribute::from_token("spe"), Some(RangedAttribute::Speed));
        assert_eq!(RangedAttribute::from_token("special-attack"), None);
    }
}
