//! Request/response correlation with TTL-based expiry.
//!
//! A [`TransactionManager`] pairs a start event with its end event by key.
//! Every pending key resolves exactly once: either an end event removes it
//! or a purge sweep drops it after the TTL. Unmatched ends and expiries are
//! ordinary outcomes, not errors.
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use crate::error::ConfigError;
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction<P> {
    pub start: Timestamp,
    /// Zero while pending; the absolute start/end distance once resolved.
    pub elapsed: Duration,
    pub payload: P,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<P> {
    NotFound,
    TimedOut(Transaction<P>),
    Valid(Transaction<P>),
}

impl<P> Resolution<P> {
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Resolution::NotFound => Outcome::NotFound,
            Resolution::TimedOut(_) => Outcome::TimedOut,
            Resolution::Valid(_) => Outcome::Valid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    NotFound,
    TimedOut,
    Valid,
}

#[derive(Debug)]
pub struct TransactionManager<K, P> {
    ttl: Duration,
    pending: HashMap<K, Transaction<P>>,
    superseded: u64,
}

impl<K, P> TransactionManager<K, P>
where
    K: Eq + Hash,
{
    /// Create an empty correlator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TtlZero`] when `ttl` is zero.
    pub fn new(ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::TtlZero);
        }
        Ok(Self {
            ttl,
            pending: HashMap::new(),
            superseded: 0,
        })
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a pending transaction. A pending record already held for
    /// `key` is replaced; returns `true` when that happened.
    pub fn start_transaction(&mut self, key: K, payload: P, stamp: Timestamp) -> bool {
        let transaction = Transaction {
            start: stamp,
            elapsed: Duration::ZERO,
            payload,
        };
        let replaced = self.pending.insert(key, transaction).is_some();
        if replaced {
            self.superseded = self.superseded.saturating_add(1);
        }
        replaced
    }

    /// Resolve `key` against an end event observed at `end`.
    pub fn maybe_end_transaction(&mut self, key: &K, end: Timestamp) -> Resolution<P> {
        let Some(mut transaction) = self.pending.remove(key) else {
            return Resolution::NotFound;
        };
        transaction.elapsed = end.abs_diff(transaction.start);
        if transaction.elapsed >= self.ttl {
            Resolution::TimedOut(transaction)
        } else {
            Resolution::Valid(transaction)
        }
    }

    /// Drop every pending record with `start + ttl <= now`; returns how
    /// many were removed.
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let before = self.pending.len();
        let ttl = self.ttl;
        self.pending
            .retain(|_, transaction| transaction.start.saturating_add(ttl) > now);
        before.saturating_sub(self.pending.len())
    }

    /// Remove and return every pending record with `start + ttl <= now`,
    /// for owners that account expiries per key.
    pub fn drain_expired(&mut self, now: Timestamp) -> Vec<(K, Transaction<P>)> {
        let ttl = self.ttl;
        let (expired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, transaction)| transaction.start.saturating_add(ttl) <= now);
        self.pending = pending.into_iter().collect();
        expired
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.pending.len()
    }

    /// Start events that replaced a still-pending record for the same key.
    #[must_use]
    pub const fn superseded_count(&self) -> u64 {
        self.superseded
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
