//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use citydb_core::config::DEFAULT_BATCH_SIZE;
use citydb_core::{
    BatchConfig, Error, ErrorPolicy, ExportConfig, IdDerivation, IdentityCacheConfig, LodFilter,
    ReferenceMode, SpillConfig, XlinkConfig,
};

/// Export features of a 3D city database as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "citydb-export")]
#[command(version, about = "Export features of a 3D city database as JSON lines")]
pub struct Args {
    /// SQLite city database
    #[arg(short = 'd', long)]
    pub database: PathBuf,

    /// Output file (standard output if omitted)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Worker threads, each with its own connection
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Levels of detail to export, e.g. "0,2,3" or "all"
    #[arg(long, default_value = "all")]
    pub lod: String,

    /// Repeated features: "reference" or "copy"
    #[arg(long, default_value = "reference")]
    pub xlink: String,

    /// Repeated geometries: "reference" or "copy"
    #[arg(long, default_value = "reference")]
    pub geometry_xlink: String,

    /// Derive copy identifiers from the original ones
    #[arg(long, value_enum, default_value = "fresh")]
    pub copy_ids: CopyIds,

    /// Record the original identifier on copies
    #[arg(long)]
    pub keep_external_reference: bool,

    /// Abort on the first reportable error
    #[arg(long)]
    pub fail_fast: bool,

    /// Keys per bulk query
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Write sub-features as separate lines, referenced from their owners
    #[arg(long)]
    pub flat: bool,

    /// Directory for identities evicted from memory (temporary if omitted)
    #[arg(long)]
    pub spill_path: Option<PathBuf>,

    /// Identities kept in memory before spilling
    #[arg(long)]
    pub hot_capacity: Option<usize>,

    /// Export only these object classes
    #[arg(long, value_delimiter = ',')]
    pub classes: Vec<i32>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json_summary: bool,
}

/// How copy identifiers are formed.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyIds {
    Fresh,
    Append,
    Prefix,
}

impl From<CopyIds> for IdDerivation {
    fn from(ids: CopyIds) -> Self {
        match ids {
            CopyIds::Fresh => IdDerivation::Fresh,
            CopyIds::Append => IdDerivation::Append,
            CopyIds::Prefix => IdDerivation::Prefix,
        }
    }
}

impl Args {
    /// Build the run configuration.
    pub fn into_config(&self) -> Result<ExportConfig, Error> {
        let lod: LodFilter = self.lod.parse()?;
        let xlink = XlinkConfig::default()
            .with_features(self.xlink.parse::<ReferenceMode>()?)
            .with_geometries(self.geometry_xlink.parse::<ReferenceMode>()?)
            .with_id_derivation(self.copy_ids.into())
            .with_external_reference(self.keep_external_reference);

        let mut identity_cache = IdentityCacheConfig::default();
        if let Some(path) = &self.spill_path {
            identity_cache = identity_cache.with_spill(SpillConfig::at(path));
        }
        if let Some(capacity) = self.hot_capacity {
            identity_cache = identity_cache.with_hot_capacity(capacity);
        }

        let policy = if self.fail_fast {
            ErrorPolicy::FailFast
        } else {
            ErrorPolicy::LogAndContinue
        };

        let mut config = ExportConfig::default()
            .with_lod(lod)
            .with_xlink(xlink)
            .with_batch(BatchConfig::default().with_size(self.batch_size))
            .with_error_policy(policy)
            .with_identity_cache(identity_cache);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        Ok(config)
    }
}
