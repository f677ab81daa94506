//! In-memory graph store.
//!
//! Elements live in persistent `im` maps, so a transaction works on a cheap
//! structural copy of the committed graph and swaps it in on commit.
//! Readers never wait on writers: a transaction only takes the writer lock on
//! its first mutation and holds it until commit or drop, so writers are
//! serialised while a long import leaves the committed graph readable.

use std::sync::Arc;

use async_trait::async_trait;
use im::{OrdMap, OrdSet};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::trace;

use tackle_core::{
    Edge, EdgeFilter, ElementId, Error, GraphStore, GraphTx, PropertyMap, Result, Vertex,
    VertexFilter,
};

#[derive(Debug, Clone, Default)]
struct GraphData {
    vertices: OrdMap<ElementId, Vertex>,
    edges: OrdMap<ElementId, Edge>,
    out_adjacency: OrdMap<ElementId, OrdSet<ElementId>>,
    in_adjacency: OrdMap<ElementId, OrdSet<ElementId>>,
    last_id: ElementId,
    /// Bumped on every commit that wrote something.
    version: u64,
}

impl GraphData {
    fn allocate_id(&mut self) -> ElementId {
        self.last_id += 1;
        self.last_id
    }

    fn insert_vertex(&mut self, vertex: Vertex) {
        self.last_id = self.last_id.max(vertex.id);
        self.vertices.insert(vertex.id, vertex);
    }

    fn insert_edge(&mut self, edge: Edge) {
        self.last_id = self.last_id.max(edge.id);
        link(&mut self.out_adjacency, edge.out_vertex, edge.id);
        link(&mut self.in_adjacency, edge.in_vertex, edge.id);
        self.edges.insert(edge.id, edge);
    }

    fn remove_edge(&mut self, id: ElementId) -> bool {
        match self.edges.remove(&id) {
            Some(edge) => {
                unlink(&mut self.out_adjacency, edge.out_vertex, id);
                unlink(&mut self.in_adjacency, edge.in_vertex, id);
                true
            }
            None => false,
        }
    }

    fn remove_vertex(&mut self, id: ElementId) -> bool {
        if self.vertices.remove(&id).is_none() {
            return false;
        }
        let incident: Vec<ElementId> = self
            .out_adjacency
            .remove(&id)
            .into_iter()
            .chain(self.in_adjacency.remove(&id))
            .flat_map(|set| set.into_iter())
            .collect();
        for edge_id in incident {
            self.remove_edge(edge_id);
        }
        true
    }

    fn adjacent_edges(
        &self,
        adjacency: &OrdMap<ElementId, OrdSet<ElementId>>,
        vertex: ElementId,
        labels: &[&str],
    ) -> Vec<Edge> {
        adjacency
            .get(&vertex)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.edges.get(id))
                    .filter(|e| labels.is_empty() || labels.contains(&e.label.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn link(adjacency: &mut OrdMap<ElementId, OrdSet<ElementId>>, vertex: ElementId, edge: ElementId) {
    let mut set = adjacency.get(&vertex).cloned().unwrap_or_default();
    set.insert(edge);
    adjacency.insert(vertex, set);
}

fn unlink(adjacency: &mut OrdMap<ElementId, OrdSet<ElementId>>, vertex: ElementId, edge: ElementId) {
    if let Some(mut set) = adjacency.get(&vertex).cloned() {
        set.remove(&edge);
        if set.is_empty() {
            adjacency.remove(&vertex);
        } else {
            adjacency.insert(vertex, set);
        }
    }
}

/// Graph store held entirely in memory.
///
/// Cloning shares the underlying graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    data: Arc<RwLock<GraphData>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from existing elements, keeping their ids.
    ///
    /// Edges may reference vertices that are not part of `vertices`; such
    /// edges are kept as-is, which is how a partially exported result graph
    /// looks.
    pub fn from_elements(vertices: Vec<Vertex>, edges: Vec<Edge>) -> Self {
        let mut data = GraphData::default();
        for vertex in vertices {
            data.insert_vertex(vertex);
        }
        for edge in edges {
            data.insert_edge(edge);
        }
        Self {
            data: Arc::new(RwLock::new(data)),
            writer: Arc::default(),
        }
    }

    pub async fn vertex_count(&self) -> usize {
        self.data.read().await.vertices.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.data.read().await.edges.len()
    }

    /// Copy of every committed element, in id order.
    pub async fn snapshot(&self) -> (Vec<Vertex>, Vec<Edge>) {
        let data = self.data.read().await;
        (
            data.vertices.values().cloned().collect(),
            data.edges.values().cloned().collect(),
        )
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn begin(&self) -> Result<Box<dyn GraphTx>> {
        let working = self.data.read().await.clone();
        Ok(Box::new(MemoryTx {
            data: Arc::clone(&self.data),
            writer: Arc::clone(&self.writer),
            writing: None,
            working,
        }))
    }
}

/// Transaction over a [`MemoryGraph`].
pub struct MemoryTx {
    data: Arc<RwLock<GraphData>>,
    writer: Arc<Mutex<()>>,
    /// Held from the first mutation until commit or drop.
    writing: Option<OwnedMutexGuard<()>>,
    working: GraphData,
}

impl MemoryTx {
    /// Take the writer lock before the first mutation.
    ///
    /// If another writer committed since this transaction's snapshot was
    /// taken, the snapshot is replaced with the committed graph so writes
    /// never build on a superseded copy.
    async fn writable(&mut self) {
        if self.writing.is_some() {
            return;
        }
        let guard = Arc::clone(&self.writer).lock_owned().await;
        {
            let committed = self.data.read().await;
            if committed.version != self.working.version {
                trace!(
                    snapshot_version = self.working.version,
                    committed_version = committed.version,
                    "Refreshing stale snapshot"
                );
                self.working = committed.clone();
            }
        }
        self.writing = Some(guard);
    }

    fn vertex_mut(&mut self, id: ElementId) -> Result<&mut Vertex> {
        self.working
            .vertices
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Vertex {}", id)))
    }

    fn edge_mut(&mut self, id: ElementId) -> Result<&mut Edge> {
        self.working
            .edges
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Edge {}", id)))
    }
}

#[async_trait]
impl GraphTx for MemoryTx {
    async fn add_vertex(
        &mut self,
        type_tags: Vec<String>,
        properties: PropertyMap,
    ) -> Result<ElementId> {
        self.writable().await;
        let id = self.working.allocate_id();
        trace!(vertex_id = id, ?type_tags, "Adding vertex");
        self.working.insert_vertex(Vertex {
            id,
            type_tags,
            properties,
        });
        Ok(id)
    }

    async fn add_edge(
        &mut self,
        label: &str,
        out_vertex: ElementId,
        in_vertex: ElementId,
        properties: PropertyMap,
    ) -> Result<ElementId> {
        self.writable().await;
        for endpoint in [out_vertex, in_vertex] {
            if !self.working.vertices.contains_key(&endpoint) {
                return Err(Error::NotFound(format!("Vertex {}", endpoint)));
            }
        }
        let id = self.working.allocate_id();
        trace!(edge_id = id, label, out_vertex, in_vertex, "Adding edge");
        self.working.insert_edge(Edge {
            id,
            label: label.to_string(),
            out_vertex,
            in_vertex,
            properties,
        });
        Ok(id)
    }

    async fn vertex(&mut self, id: ElementId) -> Result<Option<Vertex>> {
        Ok(self.working.vertices.get(&id).cloned())
    }

    async fn find_vertices(&mut self, filter: &VertexFilter) -> Result<Vec<Vertex>> {
        Ok(self
            .working
            .vertices
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect())
    }

    async fn count_vertices(&mut self, filter: &VertexFilter) -> Result<u64> {
        Ok(self
            .working
            .vertices
            .values()
            .filter(|v| filter.matches(v))
            .count() as u64)
    }

    async fn find_edges(&mut self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        Ok(self
            .working
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn count_edges(&mut self, filter: &EdgeFilter) -> Result<u64> {
        Ok(self
            .working
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .count() as u64)
    }

    async fn out_edges(&mut self, vertex: ElementId, labels: &[&str]) -> Result<Vec<Edge>> {
        Ok(self
            .working
            .adjacent_edges(&self.working.out_adjacency, vertex, labels))
    }

    async fn in_edges(&mut self, vertex: ElementId, labels: &[&str]) -> Result<Vec<Edge>> {
        Ok(self
            .working
            .adjacent_edges(&self.working.in_adjacency, vertex, labels))
    }

    async fn set_vertex_property(
        &mut self,
        id: ElementId,
        key: &str,
        value: JsonValue,
    ) -> Result<()> {
        self.writable().await;
        self.vertex_mut(id)?.properties.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_vertex_property(&mut self, id: ElementId, key: &str) -> Result<()> {
        self.writable().await;
        self.vertex_mut(id)?.properties.remove(key);
        Ok(())
    }

    async fn remove_edge_property(&mut self, id: ElementId, key: &str) -> Result<()> {
        self.writable().await;
        self.edge_mut(id)?.properties.remove(key);
        Ok(())
    }

    async fn drop_vertices(&mut self, filter: &VertexFilter) -> Result<u64> {
        self.writable().await;
        let ids: Vec<ElementId> = self
            .working
            .vertices
            .values()
            .filter(|v| filter.matches(v))
            .map(|v| v.id)
            .collect();
        let mut dropped = 0;
        for id in ids {
            if self.working.remove_vertex(id) {
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    async fn drop_edges(&mut self, filter: &EdgeFilter) -> Result<u64> {
        self.writable().await;
        let ids: Vec<ElementId> = self
            .working
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| e.id)
            .collect();
        let mut dropped = 0;
        for id in ids {
            if self.working.remove_edge(id) {
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    async fn drop_edge(&mut self, id: ElementId) -> Result<()> {
        self.writable().await;
        if self.working.remove_edge(id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Edge {}", id)))
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            data,
            writing,
            mut working,
            ..
        } = *self;
        // Read-only transactions have nothing to publish.
        if writing.is_none() {
            return Ok(());
        }
        working.version += 1;
        *data.write().await = working;
        drop(writing);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tackle_core::isolation_tag;

    fn props(pairs: &[(&str, JsonValue)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_commit_makes_changes_visible() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let a = tx.add_vertex(vec!["A".into()], PropertyMap::new()).await.unwrap();
        let b = tx.add_vertex(vec!["B".into()], PropertyMap::new()).await.unwrap();
        tx.add_edge("links", a, b, PropertyMap::new()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(graph.vertex_count().await, 2);
        assert_eq!(graph.edge_count().await, 1);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_changes() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(graph.vertex_count().await, 0);

        {
            let mut tx = graph.begin().await.unwrap();
            tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        }
        assert_eq!(graph.vertex_count().await, 0);
    }

    #[tokio::test]
    async fn test_ids_unique_across_transactions() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let first = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        tx.commit().await.unwrap();
        let mut tx = graph.begin().await.unwrap();
        let second = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_add_edge_requires_endpoints() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let a = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        let err = tx.add_edge("x", a, 999, PropertyMap::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_drop_vertices_cascades_edges() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let tagged = props(&[("analysisId", isolation_tag(1))]);
        let a = tx.add_vertex(vec!["A".into()], tagged.clone()).await.unwrap();
        let b = tx.add_vertex(vec!["B".into()], PropertyMap::new()).await.unwrap();
        tx.add_edge("ab", a, b, PropertyMap::new()).await.unwrap();
        tx.add_edge("ba", b, a, PropertyMap::new()).await.unwrap();

        let dropped = tx
            .drop_vertices(&VertexFilter::all().with_property("analysisId", "1"))
            .await
            .unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(tx.count_edges(&EdgeFilter::all()).await.unwrap(), 0);
        assert!(tx.out_edges(b, &[]).await.unwrap().is_empty());
        assert!(tx.vertex(b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_out_and_in_edges_by_label() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let a = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        let b = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        let c = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        tx.add_edge("uses", a, b, PropertyMap::new()).await.unwrap();
        tx.add_edge("owns", a, c, PropertyMap::new()).await.unwrap();

        let uses = tx.out_edges(a, &["uses"]).await.unwrap();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].in_vertex, b);
        assert_eq!(tx.out_edges(a, &[]).await.unwrap().len(), 2);
        assert_eq!(tx.in_edges(c, &["owns"]).await.unwrap().len(), 1);
        assert!(tx.in_edges(c, &["uses"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_property_updates() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let a = tx.add_vertex(vec![], props(&[("k", json!(1))])).await.unwrap();
        tx.set_vertex_property(a, "k", json!(2)).await.unwrap();
        tx.set_vertex_property(a, "other", json!("x")).await.unwrap();
        tx.remove_vertex_property(a, "other").await.unwrap();
        let v = tx.vertex(a).await.unwrap().unwrap();
        assert_eq!(v.property("k"), Some(&json!(2)));
        assert!(v.property("other").is_none());
        assert!(tx
            .set_vertex_property(404, "k", json!(1))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_from_elements_keeps_dangling_edges() {
        let graph = MemoryGraph::from_elements(
            vec![Vertex {
                id: 10,
                type_tags: vec!["A".into()],
                properties: PropertyMap::new(),
            }],
            vec![Edge {
                id: 20,
                label: "x".into(),
                out_vertex: 10,
                in_vertex: 99,
                properties: PropertyMap::new(),
            }],
        );
        assert_eq!(graph.edge_count().await, 1);
        let mut tx = graph.begin().await.unwrap();
        let next = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        assert!(next > 20);
    }

    #[tokio::test]
    async fn test_readers_do_not_wait_for_open_writer() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        tx.add_vertex(vec!["A".into()], PropertyMap::new()).await.unwrap();
        tx.commit().await.unwrap();

        let mut writer = graph.begin().await.unwrap();
        writer.add_vertex(vec!["B".into()], PropertyMap::new()).await.unwrap();

        let count = tokio::time::timeout(Duration::from_millis(200), async {
            let mut reader = graph.begin().await.unwrap();
            let count = reader.count_vertices(&VertexFilter::all()).await.unwrap();
            reader.rollback().await.unwrap();
            count
        })
        .await
        .expect("read blocked by an open writer");
        assert_eq!(count, 1);

        writer.commit().await.unwrap();
        assert_eq!(graph.vertex_count().await, 2);
    }

    #[tokio::test]
    async fn test_second_writer_waits_and_builds_on_commit() {
        let graph = MemoryGraph::new();
        let mut first = graph.begin().await.unwrap();
        let mut second = graph.begin().await.unwrap();
        let a = first.add_vertex(vec!["A".into()], PropertyMap::new()).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            second.add_vertex(vec!["B".into()], PropertyMap::new()),
        )
        .await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();
        let b = second.add_vertex(vec!["B".into()], PropertyMap::new()).await.unwrap();
        assert_ne!(a, b);
        assert!(second.vertex(a).await.unwrap().is_some());
        second.commit().await.unwrap();
        assert_eq!(graph.vertex_count().await, 2);
    }

    #[tokio::test]
    async fn test_dropped_writer_releases_lock() {
        let graph = MemoryGraph::new();
        {
            let mut tx = graph.begin().await.unwrap();
            tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        }
        let mut tx = graph.begin().await.unwrap();
        tokio::time::timeout(
            Duration::from_millis(200),
            tx.add_vertex(vec![], PropertyMap::new()),
        )
        .await
        .expect("writer lock still held")
        .unwrap();
    }

    #[tokio::test]
    async fn test_drop_edges_by_filter() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        let a = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        let b = tx.add_vertex(vec![], PropertyMap::new()).await.unwrap();
        let e = tx.add_edge("uses", a, b, PropertyMap::new()).await.unwrap();
        tx.add_edge("owns", a, b, PropertyMap::new()).await.unwrap();
        assert_eq!(tx.drop_edges(&EdgeFilter::labelled("owns")).await.unwrap(), 1);
        tx.drop_edge(e).await.unwrap();
        assert!(tx.drop_edge(e).await.unwrap_err().is_not_found());
        assert_eq!(tx.count_edges(&EdgeFilter::all()).await.unwrap(), 0);
    }
}
