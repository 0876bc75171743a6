use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use super::Aggregator;
use crate::error::MetricsError;

/// Bounded frequent-items summary (Misra-Gries).
///
/// At most `capacity` items are tracked. Reported counts are lower bounds;
/// the true count of any item is at most `count + offset`.
#[derive(Debug, Clone)]
pub struct TopN<K> {
    capacity: usize,
    counts: HashMap<K, u64>,
    offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopNEntry<K> {
    pub item: K,
    pub count: u64,
    pub upper_bound: u64,
}

impl<K> TopN<K>
where
    K: Eq + Hash + Clone + Ord,
{
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            counts: HashMap::with_capacity(capacity),
            offset: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    pub fn update_weighted(&mut self, item: K, weight: u64) {
        if weight == 0 {
            return;
        }
        if let Some(count) = self.counts.get_mut(&item) {
            *count = count.saturating_add(weight);
            return;
        }
        self.counts.insert(item, weight);
        if self.counts.len() > self.capacity {
            self.reduce();
        }
    }

    /// The `n` heaviest items, heaviest first; ties order by item.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<TopNEntry<K>> {
        let mut entries: Vec<TopNEntry<K>> = self
            .counts
            .iter()
            .map(|(item, count)| TopNEntry {
                item: item.clone(),
                count: *count,
                upper_bound: count.saturating_add(self.offset),
            })
            .collect();
        entries.sort_by(|left, right| {
            right
                .count
                .cmp(&left.count)
                .then_with(|| left.item.cmp(&right.item))
        });
        entries.truncate(n);
        entries
    }

    // Subtract the (capacity + 1)-th largest count from every item and drop
    // the ones that reach zero.
    fn reduce(&mut self) {
        let mut counts: Vec<u64> = self.counts.values().copied().collect();
        counts.sort_unstable_by(|left, right| right.cmp(left));
        let Some(&threshold) = counts.get(self.capacity) else {
            return;
        };
        self.counts.retain(|_, count| {
            *count = count.saturating_sub(threshold);
            *count > 0
        });
        self.offset = self.offset.saturating_add(threshold);
    }
}

impl<K> Aggregator for TopN<K>
where
    K: Eq + Hash + Clone + Ord,
{
    type Value = K;
    type Estimate = Vec<TopNEntry<K>>;

    fn update(&mut self, value: &K) {
        self.update_weighted(value.clone(), 1);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        if self.capacity != other.capacity {
            return Err(MetricsError::MergeMismatch {
                kind: "top_n",
                left: u64::try_from(self.capacity).unwrap_or(u64::MAX),
                right: u64::try_from(other.capacity).unwrap_or(u64::MAX),
            });
        }
        for (item, count) in &other.counts {
            let entry = self.counts.entry(item.clone()).or_insert(0);
            *entry = entry.saturating_add(*count);
        }
        self.offset = self.offset.saturating_add(other.offset);
        if self.counts.len() > self.capacity {
            self.reduce();
        }
        Ok(())
    }

    fn estimate(&self) -> Vec<TopNEntry<K>> {
        self.top(self.capacity)
    }
}
