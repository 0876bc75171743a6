use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{Aggregator, LgK, icon};
use crate::error::MetricsError;

const MAX_COLUMN: u32 = 63;

/// Distinct-count sketch over a `2^lg_k × 64` flag-bit matrix.
///
/// Each observation hashes to one row (uniform) and one column
/// (geometric), and sets that bit. The number of set bits, the coupon
/// count, is converted to a distinct-count estimate by the ICON estimator.
/// Duplicate observations set the same bit, so the coupon count only grows
/// with new values.
#[derive(Debug, Clone)]
pub struct Cardinality {
    lg_k: LgK,
    rows: Vec<u64>,
    coupons: u64,
}

impl Cardinality {
    #[must_use]
    pub fn new(lg_k: LgK) -> Self {
        Self {
            lg_k,
            rows: vec![0; lg_k.rows()],
            coupons: 0,
        }
    }

    #[must_use]
    pub const fn lg_k(&self) -> LgK {
        self.lg_k
    }

    #[must_use]
    pub const fn coupons(&self) -> u64 {
        self.coupons
    }

    /// Observe any hashable value.
    pub fn observe<T: Hash + ?Sized>(&mut self, value: &T) {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        self.insert_hash(hasher.finish());
    }

    fn insert_hash(&mut self, hash: u64) {
        let lg_k = u32::from(self.lg_k.get());
        let mask = 1u64.checked_shl(lg_k).unwrap_or(0).saturating_sub(1);
        let Ok(row) = usize::try_from(hash & mask) else {
            return;
        };
        let column = hash
            .checked_shr(lg_k)
            .unwrap_or(0)
            .trailing_zeros()
            .min(MAX_COLUMN);
        let bit = 1u64.checked_shl(column).unwrap_or(0);
        if let Some(slot) = self.rows.get_mut(row)
            && *slot & bit == 0
        {
            *slot |= bit;
            self.coupons = self.coupons.saturating_add(1);
        }
    }
}

impl Aggregator for Cardinality {
    type Value = [u8];
    type Estimate = u64;

    fn update(&mut self, value: &[u8]) {
        self.observe(value);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        if self.lg_k != other.lg_k {
            return Err(MetricsError::MergeMismatch {
                kind: "cardinality",
                left: u64::from(self.lg_k.get()),
                right: u64::from(other.lg_k.get()),
            });
        }
        let mut coupons = 0u64;
        for (row, incoming) in self.rows.iter_mut().zip(&other.rows) {
            *row |= *incoming;
            coupons = coupons.saturating_add(u64::from(row.count_ones()));
        }
        self.coupons = coupons;
        Ok(())
    }

    fn estimate(&self) -> u64 {
        let estimate = icon::estimate(self.lg_k, self.coupons);
        if estimate.is_finite() && estimate > 0.0 {
            estimate.round() as u64
        } else {
            0
        }
    }
}
