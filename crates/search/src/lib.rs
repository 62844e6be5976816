//! Dex search: filter evaluation, filter-query parsing, fuzzy name search and
//! local pagination over a loaded collection.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use dex_core::Entity;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::Serialize;
use tracing::debug;

pub mod eval;
pub mod query;

pub use eval::{apply_filters, apply_filters_with_debug, folded_stats, FilterDebugInfo};
pub use query::{parse_query, ParsedQuery, QueryError};

pub const DEFAULT_PER_PAGE: usize = 20;

pub type DocId = u32;

#[derive(Debug, Clone, Copy)]
pub struct Hit { pub doc: DocId, pub score: f32 }

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOpts {
    pub min_score: Option<f32>,
}

/// Name index over a slice of entities. `Hit::doc` indexes that slice.
pub struct Index {
    names: Vec<String>,
    ids: Vec<u32>,
}

impl Index {
    pub fn build(items: &[Arc<Entity>]) -> Self {
        metrics::gauge!("index_docs", items.len() as f64);
        Self {
            names: items.iter().map(|e| e.name.clone()).collect(),
            ids: items.iter().map(|e| e.id).collect(),
        }
    }

    pub fn len(&self) -> usize { self.names.len() }
    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    pub fn search(&self, q: &str, limit: usize) -> Vec<Hit> {
        self.search_with_opts(q, limit, SearchOpts::default())
    }

    /// Fuzzy match `q` against names; empty `q` matches everything with score 0.
    /// Ranked by score desc, then name, then id.
    pub fn search_with_opts(&self, q: &str, limit: usize, opts: SearchOpts) -> Vec<Hit> {
        let started = Instant::now();
        let matcher = SkimMatcherV2::default();
        let q = q.trim().to_ascii_lowercase();
        let mut hits: Vec<Hit> = Vec::new();
        for (i, name) in self.names.iter().enumerate() {
            let score = if q.is_empty() {
                Some(0.0f32)
            } else {
                matcher.fuzzy_match(name, &q).map(|s| s as f32)
            };
            if let Some(score) = score {
                if opts.min_score.map(|m| score >= m).unwrap_or(true) {
                    hits.push(Hit { doc: i as DocId, score });
                }
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| self.names[a.doc as usize].cmp(&self.names[b.doc as usize]))
                .then_with(|| self.ids[a.doc as usize].cmp(&self.ids[b.doc as usize]))
        });
        hits.truncate(limit);
        metrics::histogram!("search_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
        debug!(query = %q, hits = hits.len(), "search: fuzzy");
        hits
    }
}

/// Filter `items` by the structured part of `query`, then rank by its free text
/// when there is any. Without free text the filtered order is kept.
pub fn run_query(items: &[Arc<Entity>], query: &ParsedQuery, limit: usize) -> (Vec<Arc<Entity>>, FilterDebugInfo) {
    let (filtered, dbg) = apply_filters_with_debug(items, &query.spec);
    if query.text.trim().is_empty() {
        let mut out = filtered;
        out.truncate(limit);
        return (out, dbg);
    }
    let idx = Index::build(&filtered);
    let out = idx
        .search(&query.text, limit)
        .into_iter()
        .map(|h| Arc::clone(&filtered[h.doc as usize]))
        .collect();
    (out, dbg)
}

/// One page of a local result list.
#[derive(Debug, Clone, Serialize)]
pub struct PageSlice<T> {
    pub items: Vec<T>,
    /// 1-based, clamped to `1..=total_pages`.
    pub page: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Slice `items` into 1-based pages of `per_page` (0 selects the default of 20).
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> PageSlice<T> {
    let per_page = if per_page == 0 { DEFAULT_PER_PAGE } else { per_page };
    let total_pages = items.len().div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(items.len());
    PageSlice {
        items: items.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
        page,
        per_page,
        total_items: items.len(),
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn ent(id: u32, name: &str, ty: &str) -> Arc<Entity> {
        Arc::new(Entity {
            id,
            name: name.to_string(),
            categories: smallvec![ty.to_string()],
            attributes: smallvec::SmallVec::new(),
            traits: Default::default(),
            abilities: Vec::new(),
            images: Default::default(),
            species_url: None,
        })
    }

    #[test]
    fn fuzzy_ranks_and_breaks_ties() {
        let items = vec![ent(5, "charmeleon", "fire"), ent(4, "charmander", "fire"), ent(6, "charizard", "fire"), ent(1, "bulbasaur", "grass")];
        let idx = Index::build(&items);
        let hits = idx.search("charm", 10);
        let names: Vec<&str> = hits.iter().map(|h| items[h.doc as usize].name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"charmander") && names.contains(&"charmeleon"));
        assert!(idx.search("zzzz", 10).is_empty());

        let all = idx.search("", 10);
        let ordered: Vec<&str> = all.iter().map(|h| items[h.doc as usize].name.as_str()).collect();
        assert_eq!(ordered, vec!["bulbasaur", "charizard", "charmander", "charmeleon"]);
    }

    #[test]
    fn same_name_orders_by_id() {
        let items = vec![ent(10_034, "charizard", "fire"), ent(6, "charizard", "fire")];
        let hits = Index::build(&items).search("", 10);
        assert_eq!(items[hits[0].doc as usize].id, 6);
    }

    #[test]
    fn query_filters_then_ranks() {
        let items = vec![ent(4, "charmander", "fire"), ent(7, "squirtle", "water"), ent(258, "mudkip", "water")];
        let q = parse_query("type:water gen:1").unwrap();
        let (out, dbg) = run_query(&items, &q, 10);
        assert_eq!(out.iter().map(|e| e.id).collect::<Vec<_>>(), vec![7]);
        assert_eq!(dbg.after_categories, 2);

        let q = parse_query("type:water kip").unwrap();
        let (out, _) = run_query(&items, &q, 10);
        assert_eq!(out.iter().map(|e| e.id).collect::<Vec<_>>(), vec![258]);
    }

    #[test]
    fn pagination_clamps() {
        let v: Vec<u32> = (1..=45).collect();
        let p = paginate(&v, 3, 20);
        assert_eq!(p.items, (41..=45).collect::<Vec<_>>());
        assert_eq!(p.total_pages, 3);
        assert_eq!(paginate(&v, 9, 20).page, 3);
        assert_eq!(paginate(&v, 0, 0).items.len(), 20);
        let empty: Vec<u32> = Vec::new();
        let p = paginate(&empty, 1, 20);
        assert!(p.items.is_empty());
        assert_eq!(p.total_pages, 1);
    }
}
