//! Filter evaluation: AND across dimensions, OR within a dimension.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use dex_core::filter::{grouping, RangedAttribute};
use dex_core::{Attribute, Entity, FilterSpec};

/// Entity counts surviving each filter stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FilterDebugInfo {
    pub total: usize,
    pub after_categories: usize,
    pub after_groupings: usize,
    pub after_ranges: usize,
}

/// Stat values as seen by range filters.
///
/// Walks the entity's attributes in order; special attack and special defense
/// write the attack and defense buckets, so whichever comes later wins.
/// A bucket nothing wrote reads as 0.
pub fn folded_stats(entity: &Entity) -> [u16; 4] {
    let mut out = [0u16; 4];
    for v in entity.attributes.iter() {
        let slot = match v.attribute {
            Attribute::Hp => RangedAttribute::Hp,
            Attribute::Attack | Attribute::SpecialAttack => RangedAttribute::Attack,
            Attribute::Defense | Attribute::SpecialDefense => RangedAttribute::Defense,
            Attribute::Speed => RangedAttribute::Speed,
        };
        out[slot_index(slot)] = v.base;
    }
    out
}

fn slot_index(a: RangedAttribute) -> usize {
    match a {
        RangedAttribute::Hp => 0,
        RangedAttribute::Attack => 1,
        RangedAttribute::Defense => 2,
        RangedAttribute::Speed => 3,
    }
}

fn category_ok(spec: &FilterSpec, e: &Entity) -> bool {
    spec.categories.is_empty() || e.categories.iter().any(|c| spec.categories.contains(c))
}

fn grouping_ok(spec: &FilterSpec, e: &Entity) -> bool {
    spec.groupings.is_empty() || spec.groupings.iter().any(|g| grouping(*g).contains(e.id))
}

fn ranges_ok(spec: &FilterSpec, e: &Entity) -> bool {
    let folded = folded_stats(e);
    RangedAttribute::ALL
        .iter()
        .all(|a| spec.ranges.get(*a).contains(folded[slot_index(*a)]))
}

/// Entities matching every active dimension, in input order.
pub fn apply_filters(items: &[Arc<Entity>], spec: &FilterSpec) -> Vec<Arc<Entity>> {
    apply_filters_with_debug(items, spec).0
}

pub fn apply_filters_with_debug(items: &[Arc<Entity>], spec: &FilterSpec) -> (Vec<Arc<Entity>>, FilterDebugInfo) {
    let started = Instant::now();
    let mut dbg = FilterDebugInfo { total: items.len(), ..Default::default() };

    let mut out: Vec<Arc<Entity>> = items.iter().filter(|e| category_ok(spec, e)).cloned().collect();
    dbg.after_categories = out.len();
    out.retain(|e| grouping_ok(spec, e));
    dbg.after_groupings = out.len();
    if spec.ranges.any_constraining() {
        out.retain(|e| ranges_ok(spec, e));
    }
    dbg.after_ranges = out.len();

    metrics::histogram!("filter_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
    (out, dbg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_core::AttributeValue;
    use smallvec::SmallVec;

    fn mon(id: u32, types: &[&str], stats: &[(Attribute, u16)]) -> Arc<Entity> {
        Arc::new(Entity {
            id,
            name: format!("mon-{}", id),
            categories: types.iter().map(|s| s.to_string()).collect(),
            attributes: stats.iter().map(|(a, b)| AttributeValue { attribute: *a, base: *b }).collect::<SmallVec<_>>(),
            traits: Default::default(),
            abilities: Vec::new(),
            images: Default::default(),
            species_url: None,
        })
    }

    fn full(id: u32, types: &[&str], s: [u16; 6]) -> Arc<Entity> {
        mon(
            id,
            types,
            &[
                (Attribute::Hp, s[0]),
                (Attribute::Attack, s[1]),
                (Attribute::Defense, s[2]),
                (Attribute::SpecialAttack, s[3]),
                (Attribute::SpecialDefense, s[4]),
                (Attribute::Speed, s[5]),
            ],
        )
    }

    fn ids(v: &[Arc<Entity>]) -> Vec<u32> { v.iter().map(|e| e.id).collect() }

    #[test]
    fn empty_spec_is_identity() {
        let items = vec![full(3, &["grass"], [1; 6]), full(1, &["fire"], [2; 6])];
        let out = apply_filters(&items, &FilterSpec::new());
        assert_eq!(ids(&out), vec![3, 1]);
        assert!(Arc::ptr_eq(&out[0], &items[0]));
    }

    #[test]
    fn categories_or_within_and_across() {
        let items = vec![
            full(1, &["grass", "poison"], [45; 6]),
            full(4, &["fire"], [39; 6]),
            full(7, &["water"], [44; 6]),
            full(152, &["grass"], [45; 6]),
        ];
        let spec = FilterSpec::new().with_category("grass").with_category("Fire");
        assert_eq!(ids(&apply_filters(&items, &spec)), vec![1, 4, 152]);

        let spec = spec.with_grouping(1);
        assert_eq!(ids(&apply_filters(&items, &spec)), vec![1, 4]);
    }

    #[test]
    fn grouping_edges() {
        let items = vec![full(151, &["psychic"], [1; 6]), full(152, &["grass"], [1; 6]), full(10_100, &["normal"], [1; 6])];
        assert_eq!(ids(&apply_filters(&items, &FilterSpec::new().with_grouping(1))), vec![151]);
        assert_eq!(ids(&apply_filters(&items, &FilterSpec::new().with_grouping(2))), vec![152]);
        assert_eq!(ids(&apply_filters(&items, &FilterSpec::new().with_grouping(10))), vec![10_100]);
        assert_eq!(ids(&apply_filters(&items, &FilterSpec::new().with_grouping(42))).len(), 3);
    }

    #[test]
    fn hp_range_filters_inclusively() {
        let items = vec![full(1, &["a"], [45, 0, 0, 0, 0, 0]), full(2, &["a"], [100, 0, 0, 0, 0, 0]), full(3, &["a"], [101, 0, 0, 0, 0, 0])];
        let spec = FilterSpec::new().with_range(RangedAttribute::Hp, 45, 100);
        let (out, dbg) = apply_filters_with_debug(&items, &spec);
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(dbg, FilterDebugInfo { total: 3, after_categories: 3, after_groupings: 3, after_ranges: 2 });
    }

    #[test]
    fn special_stats_overwrite_physical_buckets() {
        // attack 40, special-attack 120: the later special value is what the filter sees.
        let e = full(6, &["fire"], [78, 40, 78, 120, 85, 100]);
        assert_eq!(folded_stats(&e), [78, 120, 85, 100]);
        let spec = FilterSpec::new().with_range(RangedAttribute::Attack, 100, 255);
        assert_eq!(apply_filters(&[e.clone()], &spec).len(), 1);

        // Reversed order: physical attack written last.
        let r = mon(9, &["water"], &[(Attribute::SpecialAttack, 120), (Attribute::Attack, 40)]);
        assert_eq!(folded_stats(&r), [0, 40, 0, 0]);
    }

    #[test]
    fn missing_stat_reads_zero() {
        let e = mon(5, &["normal"], &[(Attribute::Hp, 60)]);
        let spec = FilterSpec::new().with_range(RangedAttribute::Speed, 1, 255);
        assert!(apply_filters(&[e.clone()], &spec).is_empty());
        let spec = FilterSpec::new().with_range(RangedAttribute::Speed, 0, 10);
        assert_eq!(apply_filters(&[e], &spec).len(), 1);
    }

    #[test]
    fn filtering_is_idempotent() {
        let items: Vec<_> = (1..=30u32).map(|i| full(i * 37, if i % 2 == 0 { &["fire"] } else { &["water"] }, [(i * 8) as u16; 6])).collect();
        let spec = FilterSpec::new().with_category("fire").with_grouping(1).with_grouping(3).with_range(RangedAttribute::Hp, 50, 200);
        let once = apply_filters(&items, &spec);
        let twice = apply_filters(&once, &spec);
        assert_eq!(ids(&once), ids(&twice));
    }
}
