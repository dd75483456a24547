//! groundwork-core
//!
//! Document model, property values, and the resource graph.
//! No provider or state dependency: this is the shared vocabulary of the
//! groundwork system.

pub mod document;
pub mod error;
pub mod graph;
pub mod value;

pub use crate::document::{Document, ResourceDecl};
pub use crate::error::ValidationError;
pub use crate::graph::{ResourceGraph, ResourceNode};
pub use crate::value::{resolve_properties, AttrSource, PropValue, Reference};
