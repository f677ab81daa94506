//! Core traits for tackle abstractions.
//!
//! These traits define the seams between the orchestration logic and its
//! collaborators: the shared property-graph store, the per-run result graphs,
//! and the message transport to the external analysis worker.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::graph::{Edge, EdgeFilter, ElementId, PropertyMap, Vertex, VertexFilter};
use crate::models::{Destination, QueueMessage};

// =============================================================================
// GRAPH STORE TRAITS
// =============================================================================

/// A property-graph store offering explicit transaction scopes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Open a new transaction.
    ///
    /// Each transaction sees a fresh view of the store; callers that need to
    /// observe concurrent commits open a new one rather than reusing an old
    /// handle.
    async fn begin(&self) -> Result<Box<dyn GraphTx>>;
}

/// Operations available inside one graph transaction.
///
/// Dropping a transaction without calling [`GraphTx::commit`] discards every
/// change made through it.
#[async_trait]
pub trait GraphTx: Send {
    /// Create a vertex and return its store-generated id.
    async fn add_vertex(&mut self, type_tags: Vec<String>, properties: PropertyMap)
        -> Result<ElementId>;

    /// Create an edge between two existing vertices.
    async fn add_edge(
        &mut self,
        label: &str,
        out_vertex: ElementId,
        in_vertex: ElementId,
        properties: PropertyMap,
    ) -> Result<ElementId>;

    async fn vertex(&mut self, id: ElementId) -> Result<Option<Vertex>>;

    /// Vertices matching the filter, in id order.
    async fn find_vertices(&mut self, filter: &VertexFilter) -> Result<Vec<Vertex>>;

    async fn count_vertices(&mut self, filter: &VertexFilter) -> Result<u64>;

    /// Edges matching the filter, in id order.
    async fn find_edges(&mut self, filter: &EdgeFilter) -> Result<Vec<Edge>>;

    async fn count_edges(&mut self, filter: &EdgeFilter) -> Result<u64>;

    /// Outgoing edges of a vertex restricted to the given labels (all labels when empty).
    async fn out_edges(&mut self, vertex: ElementId, labels: &[&str]) -> Result<Vec<Edge>>;

    /// Incoming edges of a vertex restricted to the given labels (all labels when empty).
    async fn in_edges(&mut self, vertex: ElementId, labels: &[&str]) -> Result<Vec<Edge>>;

    async fn set_vertex_property(&mut self, id: ElementId, key: &str, value: JsonValue)
        -> Result<()>;

    async fn remove_vertex_property(&mut self, id: ElementId, key: &str) -> Result<()>;

    async fn remove_edge_property(&mut self, id: ElementId, key: &str) -> Result<()>;

    /// Drop matching vertices together with their incident edges.
    ///
    /// Returns the number of vertices dropped.
    async fn drop_vertices(&mut self, filter: &VertexFilter) -> Result<u64>;

    /// Drop matching edges. Returns the number of edges dropped.
    async fn drop_edges(&mut self, filter: &EdgeFilter) -> Result<u64>;

    async fn drop_edge(&mut self, id: ElementId) -> Result<()>;

    /// Make every change visible to subsequent transactions.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every change.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Materialises the private result graph a run wrote to its output path.
#[async_trait]
pub trait SourceGraphOpener: Send + Sync {
    async fn open(&self, output_path: &str) -> Result<Arc<dyn GraphStore>>;
}

// =============================================================================
// MESSAGING TRAITS
// =============================================================================

/// Transport between the hub and the external analysis worker.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message without waiting for it to be consumed.
    async fn send(&self, destination: Destination, message: QueueMessage) -> Result<()>;

    /// Wait for the next message on a destination.
    ///
    /// Returns `None` once the destination is closed.
    async fn receive(&self, destination: Destination) -> Result<Option<QueueMessage>>;
}
