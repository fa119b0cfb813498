//! Deferred batch resolution.
//!
//! A [`DeferredBatch`] collects keys whose resolution is postponed, each with
//! a continuation, and resolves them in fixed-width bulk queries. Keys with
//! no rows never fire their continuations. A key is fetched at most once per
//! batch; continuations enqueued for an already resolved key are served from
//! the earlier result.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use citydb_proto::Value;

use crate::error::Error;

/// Key type of a deferred batch.
pub trait BatchKey: Copy + Eq + Hash + Debug + Into<Value> {
    /// Padding value that matches no row.
    const SENTINEL: Self;
}

impl BatchKey for i64 {
    const SENTINEL: i64 = 0;
}

/// One flush of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchQuery<K> {
    /// Exactly one pending key.
    Single(K),
    /// Several keys, padded with the sentinel to the batch width.
    Bulk(Vec<K>),
}

impl<K: BatchKey> BatchQuery<K> {
    pub fn keys(&self) -> &[K] {
        match self {
            BatchQuery::Single(key) => std::slice::from_ref(key),
            BatchQuery::Bulk(keys) => keys,
        }
    }

    /// Bind parameters in key order.
    pub fn params(&self) -> Vec<Value> {
        self.keys().iter().map(|k| (*k).into()).collect()
    }
}

/// Resolves batch queries into `(key, row)` pairs.
pub trait BatchSource<K, R> {
    fn fetch(&self, query: BatchQuery<K>) -> Result<Vec<(K, R)>, Error>;
}

/// Flush counters of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub single: usize,
    pub bulk: usize,
    /// Real keys sent.
    pub keys: usize,
    /// Sentinel values sent.
    pub padding: usize,
    /// Continuations fired.
    pub fired: usize,
}

impl BatchStats {
    pub fn flushes(&self) -> usize {
        self.single + self.bulk
    }
}

/// Keys awaiting bulk resolution, with their continuations.
pub struct DeferredBatch<K, C, R> {
    width: usize,
    order: Vec<K>,
    pending: HashMap<K, Vec<C>>,
    resolved: HashMap<K, Option<Vec<R>>>,
    ready: Vec<(C, Vec<R>)>,
    stats: BatchStats,
}

impl<K: BatchKey, C, R: Clone> DeferredBatch<K, C, R> {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            order: Vec::new(),
            pending: HashMap::new(),
            resolved: HashMap::new(),
            ready: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Queue a key. Flushes through `source` once `width` keys are pending.
    pub fn enqueue(
        &mut self,
        key: K,
        continuation: C,
        source: &dyn BatchSource<K, R>,
    ) -> Result<(), Error> {
        if let Some(resolved) = self.resolved.get(&key) {
            if let Some(rows) = resolved {
                self.ready.push((continuation, rows.clone()));
                self.stats.fired += 1;
            }
            return Ok(());
        }

        match self.pending.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().push(continuation),
            Entry::Vacant(entry) => {
                entry.insert(vec![continuation]);
                self.order.push(key);
            }
        }

        if self.order.len() >= self.width {
            self.flush(source)?;
        }
        Ok(())
    }

    /// Resolve every pending key. Returns the number of queries issued.
    pub fn flush(&mut self, source: &dyn BatchSource<K, R>) -> Result<usize, Error> {
        let mut queries = 0;
        while !self.order.is_empty() {
            let take = self.order.len().min(self.width);
            let keys: Vec<K> = self.order.drain(..take).collect();

            let query = if keys.len() == 1 {
                self.stats.single += 1;
                BatchQuery::Single(keys[0])
            } else {
                self.stats.bulk += 1;
                self.stats.padding += self.width - keys.len();
                let mut padded = keys.clone();
                padded.resize(self.width, K::SENTINEL);
                BatchQuery::Bulk(padded)
            };
            self.stats.keys += keys.len();
            queries += 1;

            let mut rows_by_key: HashMap<K, Vec<R>> = HashMap::new();
            for (key, row) in source.fetch(query)? {
                if self.pending.contains_key(&key) {
                    rows_by_key.entry(key).or_default().push(row);
                }
            }

            for key in keys {
                let continuations = self.pending.remove(&key).unwrap_or_default();
                match rows_by_key.remove(&key) {
                    Some(rows) => {
                        self.stats.fired += continuations.len();
                        for continuation in continuations {
                            self.ready.push((continuation, rows.clone()));
                        }
                        self.resolved.insert(key, Some(rows));
                    }
                    None => {
                        tracing::trace!(key = ?key, "no rows for deferred key");
                        self.resolved.insert(key, None);
                    }
                }
            }
        }
        Ok(queries)
    }

    /// Continuations whose rows have arrived, in arrival order.
    pub fn take_ready(&mut self) -> Vec<(C, Vec<R>)> {
        std::mem::take(&mut self.ready)
    }

    /// Number of keys waiting for a flush.
    pub fn pending(&self) -> usize {
        self.order.len()
    }

    /// No pending keys and no unconsumed results.
    pub fn is_idle(&self) -> bool {
        self.order.is_empty() && self.ready.is_empty()
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}
