//! Feature type catalog.
//!
//! Maps object-class identifiers of the relational city database to feature
//! type descriptors.

#[allow(clippy::module_inception)]
mod catalog;
mod feature_type;

pub use catalog::TypeCatalog;
pub use feature_type::FeatureType;
