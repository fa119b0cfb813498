//! Level-of-detail and property projection, and the resolver turning an
//! export schema into a projected query.

mod filter;
mod lod;
mod resolver;

pub use filter::{ExtensionHook, Projection, ProjectionFilter};
pub use lod::{LodFilter, LodIter, MAX_LOD};
pub use resolver::{
    HookLayout, LevelLayout, ProbeLayout, ProjectionResolver, PropertyLayout, QueryLayout,
    QueryMode, ResolvedQuery,
};
