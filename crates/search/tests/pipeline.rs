#![forbid(unsafe_code)]

use std::sync::Arc;

use dex_core::{Attribute, AttributeValue, Entity};
use dex_search::{apply_filters, paginate, parse_query, run_query};
use smallvec::SmallVec;

fn mon(id: u32, name: &str, types: &[&str], hp: u16) -> Arc<Entity> {
    let stats = [
        (Attribute::Hp, hp),
        (Attribute::Attack, 50),
        (Attribute::Defense, 50),
        (Attribute::SpecialAttack, 50),
        (Attribute::SpecialDefense, 50),
        (Attribute::Speed, 50),
    ];
    Arc::new(Entity {
        id,
        name: name.to_string(),
        categories: types.iter().map(|s| s.to_string()).collect(),
        attributes: stats.iter().map(|(a, b)| AttributeValue { attribute: *a, base: *b }).collect::<SmallVec<_>>(),
        traits: Default::default(),
        abilities: Vec::new(),
        images: Default::default(),
        species_url: None,
    })
}

fn catalog() -> Vec<Arc<Entity>> {
    (1..=300u32)
        .map(|id| {
            let ty = match id % 3 { 0 => "fire", 1 => "water", _ => "grass" };
            mon(id, &format!("mon-{:03}", id), &[ty], (id % 120) as u16)
        })
        .collect()
}

#[test]
fn query_filter_and_paginate_end_to_end() {
    let items = catalog();
    let q = parse_query("type:fire gen:1 hp:45-100").unwrap();
    let (matched, dbg) = run_query(&items, &q, usize::MAX);

    assert_eq!(dbg.total, 300);
    assert_eq!(dbg.after_categories, 100);
    // fire ids within 1..=151
    assert_eq!(dbg.after_groupings, 50);
    assert!(matched.iter().all(|e| e.id <= 151 && e.id % 3 == 0));
    assert!(matched.iter().all(|e| (45..=100).contains(&(e.id % 120))));
    assert_eq!(matched.len(), dbg.after_ranges);

    let p1 = paginate(&matched, 1, 20);
    let ids: Vec<u32> = p1.items.iter().map(|e| e.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted, "filtering keeps input order");
}

#[test]
fn same_input_same_output() {
    let items = catalog();
    let spec = parse_query("type:grass type:water gen:2 spe:50").unwrap().spec;
    let a: Vec<u32> = apply_filters(&items, &spec).iter().map(|e| e.id).collect();
    let b: Vec<u32> = apply_filters(&items, &spec).iter().map(|e| e.id).collect();
    assert_eq!(a, b);
    assert!(a.iter().all(|id| (152..=251).contains(id) && id % 3 != 0));
    assert_eq!(a.len(), (152..=251u32).filter(|id| id % 3 != 0).count());
}
