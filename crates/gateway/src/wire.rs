//! Remote payload shapes and their conversion into `dex-core` types.

#![forbid(unsafe_code)]

use dex_core::{
    normalize_text, AbilityRef, Attribute, AttributeValue, Entity, ImageRefs, LocalizedText, Page,
    PhysicalTraits, SpeciesMeta,
};
use serde::Deserialize;
use smallvec::SmallVec;

use crate::GatewayError;

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UrlRef {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct TypeSlot {
    #[serde(default)]
    slot: u8,
    #[serde(rename = "type")]
    kind: NamedRef,
}

#[derive(Debug, Deserialize)]
struct StatSlot {
    base_stat: u16,
    stat: NamedRef,
}

#[derive(Debug, Deserialize)]
struct AbilitySlot {
    ability: NamedRef,
    #[serde(default)]
    is_hidden: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SpriteRef {
    front_default: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OtherSprites {
    #[serde(rename = "official-artwork", default)]
    official_artwork: Option<SpriteRef>,
    #[serde(default)]
    dream_world: Option<SpriteRef>,
}

#[derive(Debug, Default, Deserialize)]
struct Sprites {
    front_default: Option<String>,
    front_shiny: Option<String>,
    #[serde(default)]
    other: Option<OtherSprites>,
}

#[derive(Debug, Deserialize)]
struct EntityPayload {
    id: u32,
    name: String,
    #[serde(default)]
    types: Vec<TypeSlot>,
    stats: Vec<StatSlot>,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    weight: u32,
    #[serde(default)]
    base_experience: Option<u32>,
    #[serde(default)]
    abilities: Vec<AbilitySlot>,
    #[serde(default)]
    sprites: Option<Sprites>,
    #[serde(default)]
    species: Option<UrlRef>,
}

pub(crate) fn parse_page(body: &[u8]) -> Result<Page, GatewayError> {
    serde_json::from_slice::<Page>(body).map_err(|e| GatewayError::Parse(format!("page: {}", e)))
}

/// Decode an entity payload. All six base stats must be present.
pub(crate) fn parse_entity(body: &[u8]) -> Result<Entity, GatewayError> {
    let p: EntityPayload =
        serde_json::from_slice(body).map_err(|e| GatewayError::Parse(format!("entity: {}", e)))?;
    if p.id == 0 {
        return Err(GatewayError::Parse(format!("entity {} has id 0", p.name)));
    }
    let mut types = p.types;
    types.sort_by_key(|t| t.slot);
    let categories: SmallVec<[String; 2]> =
        types.into_iter().map(|t| t.kind.name.to_ascii_lowercase()).collect();

    let attributes: SmallVec<[AttributeValue; 6]> = p
        .stats
        .iter()
        .filter_map(|s| Attribute::from_wire(&s.stat.name).map(|attribute| AttributeValue { attribute, base: s.base_stat }))
        .collect();
    if let Some(missing) = Attribute::ALL.iter().find(|a| !attributes.iter().any(|v| v.attribute == **a)) {
        return Err(GatewayError::Parse(format!("entity {} missing stat {}", p.name, missing)));
    }

    let sprites = p.sprites.unwrap_or_default();
    let other = sprites.other.unwrap_or_default();
    let images = ImageRefs {
        front_default: sprites.front_default,
        front_shiny: sprites.front_shiny,
        official_artwork: other.official_artwork.and_then(|s| s.front_default),
        dream_world: other.dream_world.and_then(|s| s.front_default),
    };

    Ok(Entity {
        id: p.id,
        name: p.name.to_ascii_lowercase(),
        categories,
        attributes,
        traits: PhysicalTraits {
            height: p.height,
            weight: p.weight,
            base_experience: p.base_experience.unwrap_or(0),
        },
        abilities: p
            .abilities
            .into_iter()
            .map(|a| AbilityRef { name: a.ability.name, is_hidden: a.is_hidden })
            .collect(),
        images,
        species_url: p.species.map(|s| s.url).filter(|u| !u.is_empty()),
    })
}

#[derive(Debug, Deserialize)]
struct FlavorEntry {
    flavor_text: String,
    language: NamedRef,
}

#[derive(Debug, Deserialize)]
struct GenusEntry {
    genus: String,
    language: NamedRef,
}

#[derive(Debug, Deserialize)]
struct SpeciesPayload {
    #[serde(default)]
    flavor_text_entries: Vec<FlavorEntry>,
    #[serde(default)]
    genera: Vec<GenusEntry>,
    #[serde(default)]
    habitat: Option<NamedRef>,
    #[serde(default)]
    evolution_chain: Option<UrlRef>,
}

pub(crate) fn parse_species(body: &[u8]) -> Result<SpeciesMeta, GatewayError> {
    let p: SpeciesPayload =
        serde_json::from_slice(body).map_err(|e| GatewayError::Parse(format!("species: {}", e)))?;
    Ok(SpeciesMeta {
        flavor_text_entries: p
            .flavor_text_entries
            .into_iter()
            .map(|f| LocalizedText { text: f.flavor_text, language: f.language.name })
            .collect(),
        genera: p
            .genera
            .into_iter()
            .map(|g| LocalizedText { text: g.genus, language: g.language.name })
            .collect(),
        habitat: p.habitat.map(|h| h.name),
        evolution_chain_url: p.evolution_chain.map(|e| e.url).unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct EffectEntry {
    #[serde(default)]
    effect: String,
    #[serde(default)]
    short_effect: String,
    language: NamedRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AbilityPayload {
    #[serde(default)]
    effect_entries: Vec<EffectEntry>,
    #[serde(default)]
    flavor_text_entries: Vec<FlavorEntry>,
}

pub(crate) fn parse_ability(body: &[u8]) -> Result<AbilityPayload, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Parse(format!("ability: {}", e)))
}

fn effect_text(p: &AbilityPayload, locale: &str) -> Option<String> {
    p.effect_entries
        .iter()
        .find(|e| e.language.name == locale)
        .map(|e| if e.short_effect.is_empty() { e.effect.clone() } else { e.short_effect.clone() })
        .filter(|s| !s.is_empty())
}

/// Pick the description for `locale`: its effect entry, then its flavor text,
/// then the English effect entry. English only consults the English effect entry.
pub(crate) fn select_description(p: &AbilityPayload, locale: &str) -> String {
    let picked = if locale == "en" {
        effect_text(p, "en")
    } else {
        effect_text(p, locale)
            .or_else(|| {
                p.flavor_text_entries
                    .iter()
                    .find(|f| f.language.name == locale)
                    .map(|f| f.flavor_text.clone())
                    .filter(|s| !s.is_empty())
            })
            .or_else(|| effect_text(p, "en"))
    };
    picked.map(|s| normalize_text(&s)).unwrap_or_default()
}
