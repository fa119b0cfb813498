//! Export run configuration.

use std::path::PathBuf;

use crate::error::Error;
use crate::policy::ErrorPolicy;
use crate::projection::{ExtensionHook, LodFilter, Projection};

/// Default number of keys resolved by one bulk query.
pub const DEFAULT_BATCH_SIZE: usize = 30;

/// Default number of top-level groups between batch checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 20;

/// Default number of identities kept in memory per cache.
pub const DEFAULT_HOT_CAPACITY: usize = 100_000;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
        .max(1)
}

/// How a repeated sighting of an already exported object is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    /// Emit a `#id` link to the first materialization.
    Reference,
    /// Materialize a fresh copy under a newly generated identifier.
    Copy,
}

impl std::str::FromStr for ReferenceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reference" | "xlink" => Ok(ReferenceMode::Reference),
            "copy" | "rematerialize" => Ok(ReferenceMode::Copy),
            other => Err(Error::InvalidConfig(format!("unknown reference mode '{other}'"))),
        }
    }
}

/// How the identifier of a copy is derived from the original one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdDerivation {
    /// Ignore the original identifier.
    Fresh,
    /// Append a generated suffix to the original identifier.
    Append,
    /// Put a generated prefix in front of the original identifier.
    Prefix,
}

/// Cross-reference handling for features and geometries.
#[derive(Debug, Clone)]
pub struct XlinkConfig {
    pub features: ReferenceMode,
    pub geometries: ReferenceMode,
    pub id_derivation: IdDerivation,
    /// Record the original identifier on copies.
    pub keep_external_reference: bool,
}

impl Default for XlinkConfig {
    fn default() -> Self {
        Self {
            features: ReferenceMode::Reference,
            geometries: ReferenceMode::Reference,
            id_derivation: IdDerivation::Fresh,
            keep_external_reference: false,
        }
    }
}

impl XlinkConfig {
    /// Set the mode for repeated features.
    pub fn with_features(mut self, mode: ReferenceMode) -> Self {
        self.features = mode;
        self
    }

    /// Set the mode for repeated geometries.
    pub fn with_geometries(mut self, mode: ReferenceMode) -> Self {
        self.geometries = mode;
        self
    }

    /// Set how copy identifiers are derived.
    pub fn with_id_derivation(mut self, derivation: IdDerivation) -> Self {
        self.id_derivation = derivation;
        self
    }

    /// Record the original identifier on copies.
    pub fn with_external_reference(mut self, keep: bool) -> Self {
        self.keep_external_reference = keep;
        self
    }
}

/// Deferred batch tuning.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Keys per bulk query, before clamping to the driver's parameter limit.
    pub size: usize,
    /// Top-level groups between explicit checkpoints.
    pub checkpoint_interval: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

impl BatchConfig {
    /// Set the batch size.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    /// Set the checkpoint interval.
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Effective batch width for a driver accepting `max_parameters` binds.
    pub fn width(&self, max_parameters: usize) -> usize {
        self.size.min(max_parameters).max(1)
    }
}

/// Where identities evicted from memory are kept.
#[derive(Debug, Clone)]
pub struct SpillConfig {
    /// Directory of the spill store. `None` uses a temporary store.
    pub path: Option<PathBuf>,
    /// Page cache capacity in bytes.
    pub cache_capacity: u64,
    /// Enable zstd compression.
    pub compression: bool,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache_capacity: 64 * 1024 * 1024,
            compression: true,
        }
    }
}

impl SpillConfig {
    /// Spill into the given directory.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        match &self.path {
            Some(path) => config.path(path),
            None => config.temporary(true),
        }
    }
}

/// Identity cache sizing.
#[derive(Debug, Clone)]
pub struct IdentityCacheConfig {
    /// Entries kept in memory before draining to the spill store.
    pub hot_capacity: usize,
    /// Share of the hot window moved to the spill store per drain.
    pub drain_fraction: f64,
    pub spill: SpillConfig,
}

impl Default for IdentityCacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: DEFAULT_HOT_CAPACITY,
            drain_fraction: 0.25,
            spill: SpillConfig::default(),
        }
    }
}

impl IdentityCacheConfig {
    /// Set the hot window capacity.
    pub fn with_hot_capacity(mut self, capacity: usize) -> Self {
        self.hot_capacity = capacity.max(1);
        self
    }

    /// Set the drain fraction, clamped to `(0, 1]`.
    pub fn with_drain_fraction(mut self, fraction: f64) -> Self {
        self.drain_fraction = fraction.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Set the spill store.
    pub fn with_spill(mut self, spill: SpillConfig) -> Self {
        self.spill = spill;
        self
    }
}

/// Configuration of one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub lod: LodFilter,
    pub projection: Projection,
    pub xlink: XlinkConfig,
    pub batch: BatchConfig,
    pub error_policy: ErrorPolicy,
    pub identity_cache: IdentityCacheConfig,
    pub extension_hooks: Vec<ExtensionHook>,
    /// Worker threads, each with its own connection.
    pub workers: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            lod: LodFilter::all(),
            projection: Projection::default(),
            xlink: XlinkConfig::default(),
            batch: BatchConfig::default(),
            error_policy: ErrorPolicy::LogAndContinue,
            identity_cache: IdentityCacheConfig::default(),
            extension_hooks: Vec::new(),
            workers: default_workers(),
        }
    }
}

impl ExportConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level-of-detail filter.
    pub fn with_lod(mut self, lod: LodFilter) -> Self {
        self.lod = lod;
        self
    }

    /// Set the property projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Set cross-reference handling.
    pub fn with_xlink(mut self, xlink: XlinkConfig) -> Self {
        self.xlink = xlink;
        self
    }

    /// Set batch tuning.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Set identity cache sizing.
    pub fn with_identity_cache(mut self, config: IdentityCacheConfig) -> Self {
        self.identity_cache = config;
        self
    }

    /// Register a schema-extension hook table.
    pub fn with_extension_hook(mut self, hook: ExtensionHook) -> Self {
        self.extension_hooks.push(hook);
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_width_clamped_by_driver() {
        let batch = BatchConfig::default();
        assert_eq!(batch.width(999), DEFAULT_BATCH_SIZE);
        assert_eq!(batch.width(10), 10);
        assert_eq!(BatchConfig::default().with_size(0).size, 1);
    }

    #[test]
    fn test_reference_mode_from_str() {
        assert_eq!("copy".parse::<ReferenceMode>().unwrap(), ReferenceMode::Copy);
        assert_eq!(
            "Reference".parse::<ReferenceMode>().unwrap(),
            ReferenceMode::Reference
        );
        assert!("inline".parse::<ReferenceMode>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = ExportConfig::new()
            .with_workers(0)
            .with_error_policy(ErrorPolicy::FailFast);
        assert_eq!(config.workers, 1);
        assert_eq!(config.error_policy, ErrorPolicy::FailFast);
        assert_eq!(config.batch.checkpoint_interval, DEFAULT_CHECKPOINT_INTERVAL);
        assert!(config.identity_cache.spill.path.is_none());
    }
}
