//! Run-scoped identity caches and cross-reference resolution.

mod identity;
mod xlink;

pub use identity::{IdentityCache, IdentityCaches, ObjectIdentity};
pub use xlink::{LocalGeometrySet, Sighting, XlinkResolver};
