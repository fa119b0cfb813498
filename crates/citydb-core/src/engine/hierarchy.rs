//! Part-of reassembly.
//!
//! After the flat scan every root-level node knows the raw id of its part-of
//! parent. One pass attaches parts to parents found in the same scan and
//! returns the nodes that stay top-level.

use std::collections::HashMap;

use super::{FeatureArena, NodeIndex};
use crate::catalog::TypeCatalog;
use crate::error::Error;
use crate::policy::{ErrorReporter, Report, ReportKind};
use crate::projection::Projection;

/// Build state of a root-level node, kept beside the node itself.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub node: NodeIndex,
    pub id: i64,
    pub object_class_id: i32,
    /// Type name the node's projection filter is looked up by.
    pub projection_key: String,
    /// Raw part-of parent id. `None` or `0` for roots.
    pub parent_id: Option<i64>,
    /// Owner id for owner-keyed queries.
    pub owner: Option<i64>,
}

pub struct HierarchyReassembler<'a> {
    catalog: &'a TypeCatalog,
    projection: &'a Projection,
    reporter: &'a ErrorReporter,
}

impl<'a> HierarchyReassembler<'a> {
    pub fn new(catalog: &'a TypeCatalog, projection: &'a Projection, reporter: &'a ErrorReporter) -> Self {
        Self {
            catalog,
            projection,
            reporter,
        }
    }

    /// Attach parts below their parents under `part_property`.
    ///
    /// Returns the top-level nodes in scan order. Parts whose parent is
    /// missing are reported as dangling and omitted; parts of types that
    /// cannot take part in the composition are reported as integrity
    /// violations and omitted. Parts whose parent does not request
    /// `part_property` are dropped silently.
    pub fn reassemble(
        &self,
        arena: &mut FeatureArena,
        part_property: &str,
        nodes: &[InFlight],
    ) -> Result<Vec<NodeIndex>, Error> {
        let by_id: HashMap<i64, &InFlight> = nodes.iter().map(|n| (n.id, n)).collect();
        let mut top_level = Vec::new();

        for node in nodes {
            let parent_id = match node.parent_id {
                Some(id) if id != 0 && id != node.id => id,
                _ => {
                    top_level.push(node.node);
                    continue;
                }
            };

            if !self.catalog.is_part_capable(node.object_class_id) {
                self.reporter.report(
                    Report::new(
                        ReportKind::DataIntegrity,
                        format!("part-of parent {parent_id} set on a type that cannot be a part"),
                    )
                    .with_object(Some(node.object_class_id), node.id),
                )?;
                continue;
            }

            let Some(parent) = by_id.get(&parent_id) else {
                self.reporter.report(
                    Report::new(
                        ReportKind::DanglingReference,
                        format!("part-of parent {parent_id} was not exported"),
                    )
                    .with_object(Some(node.object_class_id), node.id),
                )?;
                continue;
            };

            if !self.catalog.is_part_capable(parent.object_class_id) {
                self.reporter.report(
                    Report::new(
                        ReportKind::DataIntegrity,
                        format!(
                            "part-of parent {parent_id} has class {} which takes no parts",
                            parent.object_class_id
                        ),
                    )
                    .with_object(Some(node.object_class_id), node.id),
                )?;
                continue;
            }

            if self.projection.requests(&parent.projection_key, part_property) {
                arena.attach_child(parent.node, part_property, node.node);
            } else {
                tracing::trace!(id = node.id, parent_id, "part-of property not requested");
            }
        }

        Ok(top_level)
    }
}
