//! Schema-driven feature exporter.

use std::collections::HashMap;
use std::sync::Arc;

use citydb_proto::{Feature, PropertyValue, Value};
use parking_lot::Mutex;

use super::context::ExportContext;
use super::session::ExportSession;
use crate::batch::BatchQuery;
use crate::engine::{DemuxOutput, Demultiplexer, FeatureNode, HierarchyReassembler, RootSlot};
use crate::error::Error;
use crate::projection::{ProjectionResolver, QueryLayout, QueryMode};
use crate::query::PreparedQuery;
use crate::run::RunServices;
use crate::schema::{FeatureSchema, SubFeatureSchema};

/// A sub-feature resolved for one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFeature {
    pub object_class_id: i32,
    /// The feature, or a reference if it was exported before.
    pub value: PropertyValue,
}

struct Statement {
    prepared: Arc<dyn PreparedQuery>,
    layout: QueryLayout,
}

/// Exports the features of one schema over one connection.
///
/// Statements are prepared on first use per query mode and reused for every
/// later call.
pub struct FeatureExporter {
    schema: Arc<FeatureSchema>,
    statements: Mutex<HashMap<QueryMode, Arc<Statement>>>,
}

impl FeatureExporter {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self {
            schema,
            statements: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Number of statements prepared so far.
    pub fn prepared(&self) -> usize {
        self.statements.lock().len()
    }

    fn statement(&self, session: &ExportSession, mode: QueryMode) -> Result<Arc<Statement>, Error> {
        let mut statements = self.statements.lock();
        if let Some(statement) = statements.get(&mode) {
            return Ok(statement.clone());
        }

        let services = &session.services;
        let config = &services.config;
        let resolved = ProjectionResolver::new(
            &config.lod,
            &config.projection,
            &config.extension_hooks,
            services.delegate.as_ref(),
        )
        .resolve(&self.schema, &mode)?;
        let prepared = session.connection.prepare(&resolved.spec)?;
        tracing::debug!(
            query = %resolved.spec.name,
            columns = resolved.spec.columns.len(),
            joins = resolved.spec.columns.joins.len(),
            "prepared export query"
        );

        let statement = Arc::new(Statement {
            prepared,
            layout: resolved.layout,
        });
        statements.insert(mode, statement.clone());
        Ok(statement)
    }

    /// Scan a statement's rows into the context's arena.
    fn run(
        &self,
        ctx: &mut ExportContext<'_>,
        statement: &Statement,
        params: &[Value],
        prealloc: Option<FeatureNode>,
    ) -> Result<DemuxOutput, Error> {
        let session = ctx.session();
        let services: &RunServices = &session.services;
        let interval = services.config.batch.checkpoint_interval;

        let mut demux = Demultiplexer::new(&statement.layout, services.demux_env(), prealloc);
        let cursor = statement.prepared.execute(params)?;
        services.metrics.record_query();

        let mut checkpointed = 0;
        for row in cursor {
            let row = row?;
            demux.push_row(ctx.arena_mut(), &row)?;
            ctx.enqueue(demux.take_deferred())?;
            if demux.groups() - checkpointed >= interval {
                ctx.checkpoint()?;
                checkpointed = demux.groups();
            }
        }
        Ok(demux.finish())
    }

    /// Export the top-level feature `id` with everything below it.
    ///
    /// Part-capable schemas whose part property is requested are queried by
    /// root, so all parts arrive in the same scan and are attached afterwards.
    /// Returns `None` if the feature does not exist or was exported before.
    pub fn export_one(
        &self,
        ctx: &mut ExportContext<'_>,
        id: i64,
        prealloc: Option<FeatureNode>,
    ) -> Result<Option<Feature>, Error> {
        let session = ctx.session();
        let services = &session.services;
        let part_of = self
            .schema
            .part_of
            .as_ref()
            .filter(|p| services.config.projection.requests(&self.schema.root.type_name, &p.property));
        let mode = match part_of {
            Some(_) => QueryMode::ByRoot,
            None => QueryMode::ById,
        };

        let statement = self.statement(session, mode)?;
        let output = self.run(ctx, &statement, &[Value::Int64(id)], prealloc)?;
        ctx.finalize()?;

        if let Some(href) = output.roots.iter().find_map(|root| match &root.slot {
            RootSlot::Reference { id: root_id, href, .. } if *root_id == id => Some(href),
            _ => None,
        }) {
            tracing::debug!(id, href = %href, "feature exported before");
            return Ok(None);
        }

        let top_level = match part_of {
            Some(part_of) => HierarchyReassembler::new(
                &services.catalog,
                &services.config.projection,
                &services.reporter,
            )
            .reassemble(ctx.arena_mut(), &part_of.property, &output.in_flight)?,
            None => output.nodes(),
        };

        let arena = ctx.arena_mut();
        let Some(node) = top_level
            .into_iter()
            .find(|node| arena.get(*node).map(|n| n.id) == Some(id))
        else {
            tracing::debug!(id, schema = %self.schema.name, "no rows for feature");
            return Ok(None);
        };
        Ok(arena.take_tree(node))
    }

    /// Export the sub-features of a batch of owners.
    ///
    /// Scans into `ctx`, which shares the owner call's geometry identifiers.
    /// Returns each resolved feature with its owner, plus the siblings lifted
    /// out for flat output.
    pub fn export_owners(
        &self,
        ctx: &mut ExportContext<'_>,
        sub_feature: &SubFeatureSchema,
        query: &BatchQuery<i64>,
    ) -> Result<(Vec<(i64, OwnedFeature)>, Vec<Feature>), Error> {
        let session = ctx.session();
        let mode = QueryMode::by_owners(sub_feature, query.keys().len());
        let statement = self.statement(session, mode)?;

        let output = self.run(ctx, &statement, &query.params(), None)?;
        ctx.finalize()?;

        let mut features = Vec::with_capacity(output.roots.len());
        for root in output.roots {
            let Some(owner) = root.owner else {
                continue;
            };
            match root.slot {
                RootSlot::Node(node) => {
                    if let Some(feature) = ctx.arena_mut().take_tree(node) {
                        features.push((
                            owner,
                            OwnedFeature {
                                object_class_id: feature.object_class_id,
                                value: PropertyValue::Feature(Box::new(feature)),
                            },
                        ));
                    }
                }
                RootSlot::Reference {
                    object_class_id,
                    href,
                    ..
                } => features.push((
                    owner,
                    OwnedFeature {
                        object_class_id,
                        value: PropertyValue::Reference(href),
                    },
                )),
            }
        }
        tracing::trace!(
            sub_feature = %sub_feature.key,
            owners = query.keys().len(),
            features = features.len(),
            "resolved sub-features"
        );
        Ok((features, ctx.take_siblings()))
    }
}
