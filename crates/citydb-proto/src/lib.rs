//! Document model for exported city features.
//!
//! These types are what the materialization engine produces and what sinks
//! serialize. They carry no engine state.

pub mod error;
pub mod feature;
pub mod geometry;
pub mod value;

pub use error::Error;
pub use feature::{Code, Feature, Property, PropertyValue};
pub use geometry::{Geometry, GeometryKind};
pub use value::Value;
