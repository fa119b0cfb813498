//! Run-scoped export counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Lock-free counters shared by all workers of a run.
pub struct ExportMetrics {
    started_at: Instant,

    features_by_type: DashMap<String, AtomicU64>,
    roots_exported: AtomicU64,
    roots_skipped: AtomicU64,

    references_emitted: AtomicU64,
    copies_made: AtomicU64,

    queries_executed: AtomicU64,
    batch_flushes: AtomicU64,

    warnings: AtomicU64,
    errors: AtomicU64,
}

impl Default for ExportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            features_by_type: DashMap::new(),
            roots_exported: AtomicU64::new(0),
            roots_skipped: AtomicU64::new(0),
            references_emitted: AtomicU64::new(0),
            copies_made: AtomicU64::new(0),
            queries_executed: AtomicU64::new(0),
            batch_flushes: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Record one materialized feature of the given type.
    pub fn record_feature(&self, type_name: &str) {
        if let Some(counter) = self.features_by_type.get(type_name) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.features_by_type
            .entry(type_name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_root_exported(&self) {
        self.roots_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_root_skipped(&self) {
        self.roots_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reference(&self) {
        self.references_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy(&self) {
        self.copies_made.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_flush(&self) {
        self.batch_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn features_of(&self, type_name: &str) -> u64 {
        self.features_by_type
            .get(type_name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            features_by_type: self
                .features_by_type
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            roots_exported: self.roots_exported.load(Ordering::Relaxed),
            roots_skipped: self.roots_skipped.load(Ordering::Relaxed),
            references_emitted: self.references_emitted.load(Ordering::Relaxed),
            copies_made: self.copies_made.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            batch_flushes: self.batch_flushes.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the run counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub elapsed_ms: u64,
    pub features_by_type: HashMap<String, u64>,
    pub roots_exported: u64,
    pub roots_skipped: u64,
    pub references_emitted: u64,
    pub copies_made: u64,
    pub queries_executed: u64,
    pub batch_flushes: u64,
    pub warnings: u64,
    pub errors: u64,
}

impl MetricsSnapshot {
    /// Total number of materialized features of all types.
    pub fn total_features(&self) -> u64 {
        self.features_by_type.values().sum()
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "exported {} top-level features ({} skipped) in {} ms",
            self.roots_exported, self.roots_skipped, self.elapsed_ms
        )?;
        let mut types: Vec<_> = self.features_by_type.iter().collect();
        types.sort();
        for (name, count) in types {
            writeln!(f, "  {name:<32} {count}")?;
        }
        writeln!(
            f,
            "references: {}, copies: {}, queries: {}, batch flushes: {}",
            self.references_emitted, self.copies_made, self.queries_executed, self.batch_flushes
        )?;
        write!(f, "warnings: {}, errors: {}", self.warnings, self.errors)
    }
}
