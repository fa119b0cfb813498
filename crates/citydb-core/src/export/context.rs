//! Per-call export state.
//!
//! An [`ExportContext`] lives for one export call. It owns the arena the call
//! builds into, the deferred batches its rows registered work with, the
//! geometry identifiers seen so far and, for flat output, the features lifted
//! out of their owners.
//!
//! Sub-features are resolved in child contexts. A child has its own arena and
//! batches but shares the geometry identifiers of the call that spawned it, so
//! one output document never carries the same identifier inline twice.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use citydb_proto::{Feature, Geometry, PropertyValue};

use super::feature::{FeatureExporter, OwnedFeature};
use super::geometry::AssembledGeometry;
use super::session::ExportSession;
use crate::batch::{BatchQuery, BatchSource, DeferredBatch};
use crate::cache::{LocalGeometrySet, ObjectIdentity, Sighting};
use crate::engine::{Deferred, FeatureArena, NodeIndex, SlotRef};
use crate::error::Error;
use crate::schema::SubFeatureSchema;

/// Owner node and its projection key.
type OwnerSlot = (NodeIndex, String);

struct SubFeatureQueue {
    sub_feature: Arc<SubFeatureSchema>,
    batch: DeferredBatch<i64, OwnerSlot, OwnedFeature>,
}

/// State of one export call.
pub struct ExportContext<'s> {
    session: &'s ExportSession,
    arena: FeatureArena,
    geometries: DeferredBatch<i64, (i64, SlotRef), AssembledGeometry>,
    sub_features: Vec<SubFeatureQueue>,
    local_geometries: Rc<RefCell<LocalGeometrySet>>,
    siblings: Vec<Feature>,
    width: usize,
}

impl<'s> ExportContext<'s> {
    pub fn new(session: &'s ExportSession) -> Self {
        Self::with_local_geometries(session, Rc::new(RefCell::new(LocalGeometrySet::new())))
    }

    fn with_local_geometries(
        session: &'s ExportSession,
        local_geometries: Rc<RefCell<LocalGeometrySet>>,
    ) -> Self {
        let width = session
            .services
            .config
            .batch
            .width(session.connection.max_bind_parameters());
        Self {
            session,
            arena: FeatureArena::new(),
            geometries: DeferredBatch::new(width),
            sub_features: Vec::new(),
            local_geometries,
            siblings: Vec::new(),
            width,
        }
    }

    pub fn session(&self) -> &'s ExportSession {
        self.session
    }

    pub fn arena(&self) -> &FeatureArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut FeatureArena {
        &mut self.arena
    }

    /// Hand deferred work to the batches. Full batches flush on the spot.
    pub fn enqueue(&mut self, deferred: Vec<Deferred>) -> Result<(), Error> {
        if deferred.is_empty() {
            return Ok(());
        }
        let session = self.session;
        for item in deferred {
            match item {
                Deferred::Geometry { root_id, slot } => {
                    self.geometries
                        .enqueue(root_id, (root_id, slot), &session.geometry)?;
                }
                Deferred::SubFeatures {
                    sub_feature,
                    owner_id,
                    owner,
                    owner_type,
                } => {
                    self.apply_geometries()?;
                    let index = self.queue_for(&sub_feature);
                    let source = SubFeatureSource::new(self, sub_feature)?;
                    self.sub_features[index]
                        .batch
                        .enqueue(owner_id, (owner, owner_type), &source)?;
                    self.siblings.extend(source.into_siblings());
                }
            }
        }
        self.apply_ready()
    }

    /// Flush every batch once and apply what arrived.
    ///
    /// Geometries of this call are sighted before its sub-features are
    /// resolved, so the owner keeps the inline copy of a shared identifier.
    pub fn checkpoint(&mut self) -> Result<(), Error> {
        let session = self.session;
        let mut queries = self.geometries.flush(&session.geometry)?;
        self.apply_geometries()?;
        for index in 0..self.sub_features.len() {
            let source = SubFeatureSource::new(self, self.sub_features[index].sub_feature.clone())?;
            queries += self.sub_features[index].batch.flush(&source)?;
            self.siblings.extend(source.into_siblings());
        }
        if queries > 0 {
            tracing::trace!(queries, "checkpoint flushed deferred batches");
        }
        self.apply_ready()
    }

    /// Flush until nothing is pending.
    pub fn finalize(&mut self) -> Result<(), Error> {
        while !self.is_idle() {
            self.checkpoint()?;
        }
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.geometries.is_idle() && self.sub_features.iter().all(|q| q.batch.is_idle())
    }

    /// Features lifted out of their owners for flat output.
    pub fn take_siblings(&mut self) -> Vec<Feature> {
        std::mem::take(&mut self.siblings)
    }

    fn queue_for(&mut self, sub_feature: &Arc<SubFeatureSchema>) -> usize {
        if let Some(index) = self
            .sub_features
            .iter()
            .position(|q| Arc::ptr_eq(&q.sub_feature, sub_feature))
        {
            return index;
        }
        self.sub_features.push(SubFeatureQueue {
            sub_feature: sub_feature.clone(),
            batch: DeferredBatch::new(self.width),
        });
        self.sub_features.len() - 1
    }

    fn apply_geometries(&mut self) -> Result<(), Error> {
        for ((root_id, slot), trees) in self.geometries.take_ready() {
            if let Some(assembled) = trees.into_iter().next() {
                let value = self.sight_geometry(root_id, assembled)?;
                self.arena.fill(slot, value);
            }
        }
        Ok(())
    }

    fn apply_ready(&mut self) -> Result<(), Error> {
        self.apply_geometries()?;

        let mut ready = Vec::new();
        for queue in &mut self.sub_features {
            for (owner, features) in queue.batch.take_ready() {
                ready.push((queue.sub_feature.clone(), owner, features));
            }
        }

        let projection = &self.session.services.config.projection;
        let flat = self.session.flat_output();
        for (sub_feature, (owner, owner_type), features) in ready {
            for owned in features {
                let name = sub_feature.property.name_for(owned.object_class_id);
                if !projection.requests(&owner_type, name) {
                    continue;
                }
                match owned.value {
                    PropertyValue::Feature(feature) if flat && feature.external_id.is_some() => {
                        let href = feature
                            .external_id
                            .as_ref()
                            .map(|id| format!("#{id}"))
                            .unwrap_or_default();
                        self.arena.push_value(owner, name, PropertyValue::Reference(href));
                        self.siblings.push(*feature);
                    }
                    value => self.arena.push_value(owner, name, value),
                }
            }
        }
        Ok(())
    }

    /// Decide between inlining, referencing and copying a resolved tree.
    fn sight_geometry(&mut self, root_id: i64, assembled: AssembledGeometry) -> Result<PropertyValue, Error> {
        let services = &self.session.services;
        let Some(external_id) = assembled.geometry.id.clone() else {
            return Ok(PropertyValue::Geometry(assembled.geometry));
        };

        let xlink = services.xlink();
        let sighting = if assembled.shared {
            xlink.geometry(ObjectIdentity::new(&external_id, root_id, 0))?
        } else {
            xlink.local_geometry(&mut self.local_geometries.borrow_mut(), &external_id)
        };

        Ok(match sighting {
            Sighting::First => PropertyValue::Geometry(assembled.geometry),
            Sighting::Reference(href) => PropertyValue::Reference(href),
            Sighting::Copy { id, .. } => {
                let mut geometry = assembled.geometry;
                clear_member_ids(&mut geometry);
                PropertyValue::Geometry(geometry.with_id(id))
            }
        })
    }
}

/// Copies keep no identifiers below the root.
fn clear_member_ids(geometry: &mut Geometry) {
    for member in &mut geometry.members {
        member.id = None;
        clear_member_ids(member);
    }
}

/// Resolves owner ids through the target schema's owner-keyed query.
struct SubFeatureSource<'s> {
    session: &'s ExportSession,
    local_geometries: Rc<RefCell<LocalGeometrySet>>,
    exporter: Arc<FeatureExporter>,
    sub_feature: Arc<SubFeatureSchema>,
    siblings: RefCell<Vec<Feature>>,
}

impl<'s> SubFeatureSource<'s> {
    fn new(owner: &ExportContext<'s>, sub_feature: Arc<SubFeatureSchema>) -> Result<Self, Error> {
        let session = owner.session;
        let exporter = session
            .registry
            .by_name(&session.services.schemas, &sub_feature.target)?;
        Ok(Self {
            session,
            local_geometries: owner.local_geometries.clone(),
            exporter,
            sub_feature,
            siblings: RefCell::new(Vec::new()),
        })
    }

    fn into_siblings(self) -> Vec<Feature> {
        self.siblings.into_inner()
    }
}

impl BatchSource<i64, OwnedFeature> for SubFeatureSource<'_> {
    fn fetch(&self, query: BatchQuery<i64>) -> Result<Vec<(i64, OwnedFeature)>, Error> {
        self.session.services.metrics.record_batch_flush();
        let mut ctx = ExportContext::with_local_geometries(self.session, self.local_geometries.clone());
        let (features, siblings) = self
            .exporter
            .export_owners(&mut ctx, &self.sub_feature, &query)?;
        self.siblings.borrow_mut().extend(siblings);
        Ok(features)
    }
}
