//! Access to the private result graph a run leaves in its output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use tackle_core::defaults::SOURCE_GRAPH_FILE;
use tackle_core::{Edge, Error, GraphStore, Result, SourceGraphOpener, Vertex};

use crate::memory::MemoryGraph;

/// On-disk shape of a serialized result graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDocument {
    pub fn into_store(self) -> MemoryGraph {
        MemoryGraph::from_elements(self.vertices, self.edges)
    }
}

/// Loads `<output_path>/graph/graph.json` into a fresh in-memory store.
///
/// Relative output paths are resolved against `base` when one is set.
#[derive(Debug, Clone, Default)]
pub struct JsonGraphLoader {
    base: Option<PathBuf>,
}

impl JsonGraphLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Location of the serialized graph for a run's output path.
    pub fn graph_file(&self, output_path: &str) -> PathBuf {
        let output = Path::new(output_path);
        let root = match (&self.base, output.is_relative()) {
            (Some(base), true) => base.join(output),
            _ => output.to_path_buf(),
        };
        root.join(SOURCE_GRAPH_FILE)
    }

    pub async fn load(&self, output_path: &str) -> Result<GraphDocument> {
        let file = self.graph_file(output_path);
        let bytes = tokio::fs::read(&file).await.map_err(|e| {
            Error::Merge(format!(
                "Cannot read result graph {}: {}",
                file.display(),
                e
            ))
        })?;
        let document: GraphDocument = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Merge(format!(
                "Malformed result graph {}: {}",
                file.display(),
                e
            ))
        })?;
        debug!(
            file = %file.display(),
            vertex_count = document.vertices.len(),
            edge_count = document.edges.len(),
            "Result graph loaded"
        );
        Ok(document)
    }
}

#[async_trait]
impl SourceGraphOpener for JsonGraphLoader {
    #[instrument(skip(self), fields(subsystem = "db", component = "source"))]
    async fn open(&self, output_path: &str) -> Result<Arc<dyn GraphStore>> {
        let document = self.load(output_path).await?;
        Ok(Arc::new(document.into_store()))
    }
}

/// Pre-built result graphs keyed by output path.
#[derive(Debug, Default)]
pub struct StaticSourceGraphs {
    graphs: RwLock<HashMap<String, MemoryGraph>>,
}

impl StaticSourceGraphs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, output_path: impl Into<String>, graph: MemoryGraph) {
        if let Ok(mut graphs) = self.graphs.write() {
            graphs.insert(output_path.into(), graph);
        }
    }

    pub fn with_graph(self, output_path: impl Into<String>, graph: MemoryGraph) -> Self {
        self.insert(output_path, graph);
        self
    }
}

#[async_trait]
impl SourceGraphOpener for StaticSourceGraphs {
    async fn open(&self, output_path: &str) -> Result<Arc<dyn GraphStore>> {
        let graph = self
            .graphs
            .read()
            .ok()
            .and_then(|graphs| graphs.get(output_path).cloned());
        match graph {
            Some(graph) => Ok(Arc::new(graph)),
            None => Err(Error::Merge(format!(
                "No result graph registered for {}",
                output_path
            ))),
        }
    }
}
