//! Typed filter query: `type:fire gen:1 hp:50-100 atk:80- char`.

#![forbid(unsafe_code)]

use dex_core::filter::{AttributeRange, RangedAttribute, GROUPINGS, STAT_CEIL, STAT_FLOOR};
use dex_core::FilterSpec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid grouping '{0}'")]
    Grouping(String),
    #[error("invalid {attr} range '{raw}' (expected MIN-MAX within 0-255)")]
    Range { attr: RangedAttribute, raw: String },
}

/// A parsed query: the structured filter plus whatever free text remained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub spec: FilterSpec,
    pub text: String,
}

/// Parse whitespace-separated tokens. Known prefixes with a malformed value are
/// errors; anything unrecognised becomes free text.
pub fn parse_query(q: &str) -> Result<ParsedQuery, QueryError> {
    let mut spec = FilterSpec::new();
    let mut free: Vec<&str> = Vec::new();
    for tok in q.split_whitespace() {
        let Some((key, val)) = tok.split_once(':') else {
            free.push(tok);
            continue;
        };
        let key = key.to_ascii_lowercase();
        if key == "type" && !val.is_empty() {
            spec = spec.with_category(val);
            continue;
        }
        if key == "gen" {
            let g = val
                .parse::<u8>()
                .ok()
                .filter(|g| (1..=GROUPINGS.len()).contains(&usize::from(*g)))
                .ok_or_else(|| QueryError::Grouping(val.to_string()))?;
            spec = spec.with_grouping(g);
            continue;
        }
        if let Some(attr) = RangedAttribute::from_token(&key) {
            spec.ranges.set(attr, parse_range(attr, val)?);
            continue;
        }
        free.push(tok);
    }
    Ok(ParsedQuery { spec, text: free.join(" ") })
}

/// `MIN-MAX`, `MIN-`, `-MAX` or a single exact value.
fn parse_range(attr: RangedAttribute, raw: &str) -> Result<AttributeRange, QueryError> {
    let bad = || QueryError::Range { attr, raw: raw.to_string() };
    let bound = |s: &str, default: u16| -> Result<u16, QueryError> {
        if s.is_empty() {
            return Ok(default);
        }
        s.parse::<u16>().ok().filter(|v| *v <= STAT_CEIL).ok_or_else(bad)
    };
    let (min, max) = match raw.split_once('-') {
        Some((lo, hi)) => (bound(lo, STAT_FLOOR)?, bound(hi, STAT_CEIL)?),
        None if !raw.is_empty() => {
            let v = bound(raw, STAT_FLOOR)?;
            (v, v)
        }
        None => return Err(bad()),
    };
    if min > max {
        return Err(bad());
    }
    Ok(AttributeRange::new(min, max))
}
