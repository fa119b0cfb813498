//! First-sighting versus repeat decisions for identified objects.

use std::collections::HashSet;

use super::{IdentityCache, IdentityCaches, ObjectIdentity};
use crate::config::{ReferenceMode, XlinkConfig};
use crate::error::Error;
use crate::metrics::ExportMetrics;
use crate::services::IdGenerator;

/// Outcome of sighting an externally identified object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sighting {
    /// Never seen in this scope: materialize fully.
    First,
    /// Seen before: emit this `#id` link instead.
    Reference(String),
    /// Seen before: materialize a copy under a new identifier.
    Copy { id: String, original: String },
}

/// Geometry identifiers seen during one export call. Not shared across
/// calls or workers.
#[derive(Debug, Default)]
pub struct LocalGeometrySet {
    seen: HashSet<String>,
}

impl LocalGeometrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an identifier. Returns `true` on the first sighting.
    pub fn insert(&mut self, external_id: &str) -> bool {
        self.seen.insert(external_id.to_string())
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.seen.contains(external_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Applies the run's reference modes to identity cache lookups.
pub struct XlinkResolver<'a> {
    config: &'a XlinkConfig,
    caches: &'a IdentityCaches,
    ids: &'a dyn IdGenerator,
    metrics: &'a ExportMetrics,
}

impl<'a> XlinkResolver<'a> {
    pub fn new(
        config: &'a XlinkConfig,
        caches: &'a IdentityCaches,
        ids: &'a dyn IdGenerator,
        metrics: &'a ExportMetrics,
    ) -> Self {
        Self {
            config,
            caches,
            ids,
            metrics,
        }
    }

    /// Sight a feature in the run-wide feature cache.
    pub fn feature(&self, identity: ObjectIdentity) -> Result<Sighting, Error> {
        self.sight(&self.caches.features, identity, self.config.features)
    }

    /// Sight a shared geometry in the run-wide geometry cache.
    pub fn geometry(&self, identity: ObjectIdentity) -> Result<Sighting, Error> {
        self.sight(&self.caches.geometries, identity, self.config.geometries)
    }

    /// Sight a non-shared geometry within one export call.
    pub fn local_geometry(&self, local: &mut LocalGeometrySet, external_id: &str) -> Sighting {
        if local.insert(external_id) {
            Sighting::First
        } else {
            self.repeat(external_id, self.config.geometries)
        }
    }

    /// Whether copies should carry a pointer to the original identifier.
    pub fn keep_external_reference(&self) -> bool {
        self.config.keep_external_reference
    }

    fn sight(
        &self,
        cache: &IdentityCache,
        identity: ObjectIdentity,
        mode: ReferenceMode,
    ) -> Result<Sighting, Error> {
        let external_id = identity.external_id.clone();
        if !cache.lookup_and_put(identity)? {
            return Ok(Sighting::First);
        }
        Ok(self.repeat(&external_id, mode))
    }

    fn repeat(&self, external_id: &str, mode: ReferenceMode) -> Sighting {
        match mode {
            ReferenceMode::Reference => {
                self.metrics.record_reference();
                Sighting::Reference(format!("#{external_id}"))
            }
            ReferenceMode::Copy => {
                self.metrics.record_copy();
                Sighting::Copy {
                    id: self.ids.derive(external_id, self.config.id_derivation),
                    original: external_id.to_string(),
                }
            }
        }
    }
}
