//! Rent/return pool for row storage, keyed by row width

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::row::Row;
use crate::value::Value;

/// Usage statistics for a row pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowPoolStats {
    /// Rows handed out
    pub rented: u64,

    /// Rents served from retained storage
    pub reused: u64,

    /// Rents that needed a fresh allocation
    pub allocated: u64,

    /// Storage handed back and retained for reuse
    pub returned: u64,

    /// Storage handed back but dropped because the width bucket was full
    pub discarded: u64,

    /// Rows currently rented and not yet dropped
    pub outstanding: u64,

    /// Highest value `outstanding` has reached
    pub peak_outstanding: u64,
}

/// A pool of reusable row buffers
///
/// Cloning the pool is cheap and every clone shares the same storage.
/// Rented rows hand their storage back on drop, so a buffer can never be
/// returned twice or used after it was returned.
#[derive(Clone)]
pub struct RowPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    /// Free buffers by width
    free: Mutex<HashMap<usize, Vec<Vec<Value>>>>,

    /// Maximum buffers retained per width
    max_retained_per_width: usize,

    stats: Mutex<RowPoolStats>,
}

impl RowPool {
    /// Create a pool retaining at most `max_retained_per_width` buffers per width
    pub fn new(max_retained_per_width: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(HashMap::new()),
                max_retained_per_width,
                stats: Mutex::new(RowPoolStats::default()),
            }),
        }
    }

    /// Rent a row of `width` values, all set to the database-null sentinel
    pub fn rent(&self, width: usize) -> Row {
        let recycled = lock(&self.shared.free)
            .get_mut(&width)
            .and_then(Vec::pop);

        let mut stats = lock(&self.shared.stats);
        stats.rented += 1;
        stats.outstanding += 1;
        stats.peak_outstanding = stats.peak_outstanding.max(stats.outstanding);
        let values = match recycled {
            Some(values) => {
                stats.reused += 1;
                values
            }
            None => {
                stats.allocated += 1;
                vec![Value::Null; width]
            }
        };
        drop(stats);

        Row::pooled(values, Arc::clone(&self.shared))
    }

    /// Number of free buffers of `width` currently retained
    pub fn retained(&self, width: usize) -> usize {
        lock(&self.shared.free).get(&width).map_or(0, Vec::len)
    }

    /// Get pool usage statistics
    pub fn stats(&self) -> RowPoolStats {
        lock(&self.shared.stats).clone()
    }

    /// Drop every retained buffer
    pub fn clear(&self) {
        lock(&self.shared.free).clear();
    }
}

impl Default for RowPool {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for RowPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowPool")
            .field("max_retained_per_width", &self.shared.max_retained_per_width)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolShared {
    /// Take back storage from a dropped row
    pub(crate) fn give_back(&self, mut values: Vec<Value>) {
        let width = values.len();
        values.iter_mut().for_each(|v| *v = Value::Null);

        let retained = {
            let mut free = lock(&self.free);
            let bucket = free.entry(width).or_default();
            if bucket.len() < self.max_retained_per_width {
                bucket.push(values);
                true
            } else {
                false
            }
        };

        let mut stats = lock(&self.stats);
        stats.outstanding = stats.outstanding.saturating_sub(1);
        if retained {
            stats.returned += 1;
        } else {
            stats.discarded += 1;
        }
    }

    /// Account for a row whose storage was detached instead of returned
    pub(crate) fn forget(&self) {
        let mut stats = lock(&self.stats);
        stats.outstanding = stats.outstanding.saturating_sub(1);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
