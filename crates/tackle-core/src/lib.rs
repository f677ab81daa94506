//! # tackle-core
//!
//! Core types, traits, and abstractions for the tackle analysis hub.
//!
//! This crate provides the graph element model, the store and transport
//! traits, the type registry, and the progress broadcaster that the other
//! tackle crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod kinds;
pub mod logging;
pub mod models;
pub mod schema;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{ProgressBroadcaster, Subscription};
pub use graph::{
    isolation_tag, join_edge_tags, split_edge_tags, Edge, EdgeFilter, ElementId, PropertyMap,
    Vertex, VertexFilter,
};
pub use ids::IdGenerator;
pub use kinds::{
    CompositeKind, Kind, KindDeclaration, KindId, ResolvedKind, TypeRegistry, TypeTagged,
    BUILTIN_KINDS,
};
pub use models::*;
pub use traits::*;
