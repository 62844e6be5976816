//! Side-by-side comparison set.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use crate::Entity;

pub const MAX_COMPARISONS: usize = 4;

/// Ordered set of up to `cap` entities. Adding to a full set drops the oldest.
#[derive(Debug, Clone)]
pub struct Comparison {
    items: VecDeque<Arc<Entity>>,
    cap: usize,
}

impl Default for Comparison {
    fn default() -> Self { Self::with_capacity(MAX_COMPARISONS) }
}

impl Comparison {
    pub fn new() -> Self { Self::default() }

    pub fn with_capacity(cap: usize) -> Self {
        Self { items: VecDeque::with_capacity(cap.max(1)), cap: cap.max(1) }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn capacity(&self) -> usize { self.cap }

    /// Returns the evicted entity, if any.
    pub fn add(&mut self, entity: Arc<Entity>) -> Option<Arc<Entity>> {
        if self.contains(entity.id) {
            return None;
        }
        let evicted = if self.items.len() >= self.cap { self.items.pop_front() } else { None };
        self.items.push_back(entity);
        evicted
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.items.len();
        self.items.retain(|e| e.id != id);
        self.items.len() != before
    }

    pub fn clear(&mut self) { self.items.clear(); }

    pub fn contains(&self, id: u32) -> bool { self.items.iter().any(|e| e.id == id) }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> { self.items.iter() }
}
