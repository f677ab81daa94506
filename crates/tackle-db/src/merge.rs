//! Graph merge engine.
//!
//! Copies the private result graph of one run into the central graph under
//! the owning analysis' isolation tag. The previously imported subgraph for
//! that tag is removed first, in the same transaction, so a re-run replaces
//! the old results in place. Configuration vertices are only untagged, which
//! keeps older runs pointing at a valid configuration.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, trace, warn};

use tackle_core::defaults::{ISOLATION_TAG_PROP, MERGE_PROGRESS_INTERVAL, MERGE_TASK, TYPE_PROP};
use tackle_core::schema::{configuration, java_configuration};
use tackle_core::{
    isolation_tag, join_edge_tags, EdgeFilter, ElementId, Error, GraphStore, GraphTx,
    ProgressBroadcaster, ProgressEvent, PropertyMap, Result, VertexFilter,
};

use crate::analyses::{Aggregates, AnalysisRepository};

/// State reported on merge progress events.
pub const MERGING_STATE: &str = "MERGING";

/// Outcome of a successful merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub vertices_imported: u64,
    pub edges_imported: u64,
    /// Edges dropped because an endpoint was not part of the import.
    pub edges_skipped: u64,
    pub total_effort: i64,
    pub issues_per_category: BTreeMap<String, i64>,
    pub configuration_attached: bool,
}

/// Outcome of removing an analysis' imported subgraph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Configuration vertices and edges whose tag was stripped.
    pub untagged: u64,
    pub vertices_dropped: u64,
    pub edges_dropped: u64,
}

/// Imports run result graphs into the central graph.
#[derive(Debug, Clone)]
pub struct GraphMerger {
    broadcaster: ProgressBroadcaster,
    repository: AnalysisRepository,
    progress_interval: u64,
}

impl GraphMerger {
    pub fn new(broadcaster: ProgressBroadcaster, repository: AnalysisRepository) -> Self {
        Self {
            broadcaster,
            repository,
            progress_interval: MERGE_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Merge `source` into `central` for one analysis and run.
    ///
    /// The whole merge is one central transaction: any failure other than a
    /// dangling edge discards it and surfaces as [`Error::Merge`].
    #[instrument(
        skip(self, central, source),
        fields(subsystem = "db", component = "merge", op = "merge")
    )]
    pub async fn merge(
        &self,
        central: &dyn GraphStore,
        source: &dyn GraphStore,
        analysis_id: i64,
        run_id: i64,
    ) -> Result<MergeReport> {
        let start = Instant::now();
        info!(analysis_id, run_id, "Merge started");

        match self.run_merge(central, source, analysis_id, run_id).await {
            Ok(report) => {
                info!(
                    analysis_id,
                    run_id,
                    vertex_count = report.vertices_imported,
                    edge_count = report.edges_imported,
                    skipped_edges = report.edges_skipped,
                    total_effort = report.total_effort,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Merge completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    analysis_id,
                    run_id,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Merge aborted, central graph left unchanged"
                );
                Err(match e {
                    Error::Merge(msg) => Error::Merge(msg),
                    other => Error::Merge(other.to_string()),
                })
            }
        }
    }

    async fn run_merge(
        &self,
        central: &dyn GraphStore,
        source: &dyn GraphStore,
        analysis_id: i64,
        run_id: i64,
    ) -> Result<MergeReport> {
        let tag = isolation_tag(analysis_id);

        let mut source_tx = source.begin().await?;
        let source_vertices = source_tx.find_vertices(&VertexFilter::all()).await?;
        let source_edges = source_tx.find_edges(&EdgeFilter::all()).await?;
        source_tx.rollback().await?;

        let total = (source_vertices.len() + source_edges.len()) as i64;
        debug!(
            analysis_id,
            vertex_count = source_vertices.len(),
            edge_count = source_edges.len(),
            "Source graph read"
        );

        let mut tx = central.begin().await?;
        let deleted = delete_subgraph(tx.as_mut(), analysis_id).await?;
        debug!(
            analysis_id,
            untagged = deleted.untagged,
            vertex_count = deleted.vertices_dropped,
            edge_count = deleted.edges_dropped,
            "Previous subgraph removed"
        );

        let mut report = MergeReport::default();
        let mut imported: u64 = 0;
        let mut id_map: HashMap<ElementId, ElementId> = HashMap::with_capacity(source_vertices.len());

        for vertex in source_vertices {
            if vertex.type_tags.is_empty() {
                trace!(vertex_id = vertex.id, "Skipping untyped vertex");
                continue;
            }
            let mut properties = without_type_prop(vertex.properties);
            properties.insert(ISOLATION_TAG_PROP.to_string(), tag.clone());
            let new_id = tx.add_vertex(vertex.type_tags, properties).await?;
            trace!(source_id = vertex.id, new_id, "Vertex imported");
            id_map.insert(vertex.id, new_id);
            report.vertices_imported += 1;
            imported += 1;
            self.maybe_publish(analysis_id, total, imported);
        }

        for edge in source_edges {
            imported += 1;
            let endpoints = (id_map.get(&edge.out_vertex), id_map.get(&edge.in_vertex));
            let (Some(&out_vertex), Some(&in_vertex)) = endpoints else {
                warn!(
                    analysis_id,
                    edge_id = edge.id,
                    label = %edge.label,
                    out_vertex = edge.out_vertex,
                    in_vertex = edge.in_vertex,
                    "Skipping edge whose endpoint was not imported"
                );
                report.edges_skipped += 1;
                self.maybe_publish(analysis_id, total, imported);
                continue;
            };
            let tags = edge.type_tags();
            let mut properties = without_type_prop(edge.properties);
            if !tags.is_empty() {
                properties.insert(
                    TYPE_PROP.to_string(),
                    JsonValue::String(join_edge_tags(&tags)),
                );
            }
            properties.insert(ISOLATION_TAG_PROP.to_string(), tag.clone());
            let new_id = tx
                .add_edge(&edge.label, out_vertex, in_vertex, properties)
                .await?;
            trace!(source_id = edge.id, new_id, "Edge imported");
            report.edges_imported += 1;
            self.maybe_publish(analysis_id, total, imported);
        }

        let config = first_tagged(tx.as_mut(), configuration::TYPE, &tag).await?;
        let java_config = first_tagged(tx.as_mut(), java_configuration::TYPE, &tag).await?;
        if config.is_none() {
            warn!(analysis_id, run_id, "Result graph has no configuration vertex");
        }
        if java_config.is_none() {
            warn!(analysis_id, run_id, "Result graph has no java configuration vertex");
        }

        let run_vertex = self.repository.find_run_vertex(tx.as_mut(), run_id).await?;
        self.repository
            .attach_configuration(tx.as_mut(), run_vertex.id, config, java_config)
            .await?;
        report.configuration_attached = config.is_some();

        let Aggregates {
            total_effort,
            issues_per_category,
        } = self
            .repository
            .compute_aggregates(tx.as_mut(), analysis_id)
            .await?;
        self.repository
            .store_aggregates(
                tx.as_mut(),
                run_vertex.id,
                &Aggregates {
                    total_effort,
                    issues_per_category: issues_per_category.clone(),
                },
            )
            .await?;
        for (category, count) in &issues_per_category {
            debug!(analysis_id, category = %category, count, "Issues per category");
        }
        report.total_effort = total_effort;
        report.issues_per_category = issues_per_category;

        self.publish(analysis_id, total, total);
        tx.commit().await?;
        Ok(report)
    }

    /// Intermediate progress. The last element is left to the terminal event.
    fn maybe_publish(&self, analysis_id: i64, total: i64, imported: u64) {
        if imported % self.progress_interval == 0 && imported as i64 != total {
            self.publish(analysis_id, total, imported as i64);
        }
    }

    fn publish(&self, analysis_id: i64, total: i64, completed: i64) {
        self.broadcaster.publish_event(&ProgressEvent::new(
            analysis_id,
            MERGING_STATE,
            MERGE_TASK,
            total,
            completed,
        ));
    }

    /// Remove an analysis' imported subgraph in its own transaction.
    #[instrument(
        skip(self, central),
        fields(subsystem = "db", component = "merge", op = "delete_subgraph")
    )]
    pub async fn delete_analysis_graph(
        &self,
        central: &dyn GraphStore,
        analysis_id: i64,
    ) -> Result<DeleteReport> {
        let tagged = VertexFilter::all().having(ISOLATION_TAG_PROP);
        let mut tx = central.begin().await?;
        let before = tx.count_vertices(&tagged).await?;
        let report = delete_subgraph(tx.as_mut(), analysis_id).await?;
        tx.commit().await?;

        let mut tx = central.begin().await?;
        let after = tx.count_vertices(&tagged).await?;
        tx.rollback().await?;

        info!(
            analysis_id,
            before,
            after,
            untagged = report.untagged,
            vertex_count = report.vertices_dropped,
            edge_count = report.edges_dropped,
            "Analysis graph deleted"
        );
        Ok(report)
    }
}

/// Remove everything carrying the analysis' isolation tag.
///
/// Configuration vertices, the vertices they reach through their
/// configuration edges, and those edges lose the tag instead of being
/// dropped, so runs that already point at them keep a full configuration.
pub async fn delete_subgraph(tx: &mut dyn GraphTx, analysis_id: i64) -> Result<DeleteReport> {
    let tag = isolation_tag(analysis_id);
    let mut report = DeleteReport::default();

    let configs = [
        (configuration::TYPE, configuration::EDGE_LABELS),
        (java_configuration::TYPE, java_configuration::EDGE_LABELS),
    ];
    for (type_tag, labels) in configs {
        let filter = VertexFilter::of_type(type_tag).with_property(ISOLATION_TAG_PROP, tag.clone());
        for config in tx.find_vertices(&filter).await? {
            for edge in tx.out_edges(config.id, labels).await? {
                if edge.property(ISOLATION_TAG_PROP) == Some(&tag) {
                    tx.remove_edge_property(edge.id, ISOLATION_TAG_PROP).await?;
                    report.untagged += 1;
                }
                if let Some(target) = tx.vertex(edge.in_vertex).await? {
                    if target.property(ISOLATION_TAG_PROP) == Some(&tag) {
                        tx.remove_vertex_property(target.id, ISOLATION_TAG_PROP)
                            .await?;
                        report.untagged += 1;
                    }
                }
            }
            tx.remove_vertex_property(config.id, ISOLATION_TAG_PROP)
                .await?;
            report.untagged += 1;
        }
    }

    report.vertices_dropped = tx
        .drop_vertices(&VertexFilter::all().with_property(ISOLATION_TAG_PROP, tag.clone()))
        .await?;
    report.edges_dropped = tx
        .drop_edges(&EdgeFilter::all().with_property(ISOLATION_TAG_PROP, tag))
        .await?;
    Ok(report)
}

async fn first_tagged(
    tx: &mut dyn GraphTx,
    type_tag: &str,
    tag: &JsonValue,
) -> Result<Option<ElementId>> {
    let filter = VertexFilter::of_type(type_tag).with_property(ISOLATION_TAG_PROP, tag.clone());
    Ok(tx.find_vertices(&filter).await?.first().map(|v| v.id))
}

fn without_type_prop(mut properties: PropertyMap) -> PropertyMap {
    properties.remove(TYPE_PROP);
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tackle_core::{Edge, IdGenerator, TypeRegistry, Vertex};

    use crate::memory::MemoryGraph;

    fn vertex(id: ElementId, tags: &[&str]) -> Vertex {
        Vertex {
            id,
            type_tags: tags.iter().map(|s| s.to_string()).collect(),
            properties: PropertyMap::new(),
        }
    }

    fn edge(id: ElementId, label: &str, out_vertex: ElementId, in_vertex: ElementId) -> Edge {
        Edge {
            id,
            label: label.to_string(),
            out_vertex,
            in_vertex,
            properties: PropertyMap::new(),
        }
    }

    #[test]
    fn test_without_type_prop() {
        let mut properties = PropertyMap::new();
        properties.insert(TYPE_PROP.to_string(), json!("X"));
        properties.insert("name".to_string(), json!("n"));
        let stripped = without_type_prop(properties);
        assert_eq!(stripped.len(), 1);
        assert!(stripped.contains_key("name"));
    }

    #[tokio::test]
    async fn test_delete_subgraph_keeps_configuration_untagged() {
        let central = MemoryGraph::from_elements(Vec::new(), Vec::new());
        let mut tx = central.begin().await.unwrap();
        let tagged = |extra: &[(&str, JsonValue)]| {
            let mut p = PropertyMap::new();
            p.insert(ISOLATION_TAG_PROP.to_string(), isolation_tag(5));
            for (k, v) in extra {
                p.insert(k.to_string(), v.clone());
            }
            p
        };
        let config = tx
            .add_vertex(vec![configuration::TYPE.to_string()], tagged(&[]))
            .await
            .unwrap();
        let tech = tx
            .add_vertex(vec!["TechnologyReferenceModel".to_string()], tagged(&[]))
            .await
            .unwrap();
        let file = tx
            .add_vertex(vec!["FileResource".to_string()], tagged(&[]))
            .await
            .unwrap();
        tx.add_edge(configuration::TARGET_TECHNOLOGY, config, tech, tagged(&[]))
            .await
            .unwrap();
        tx.add_edge("child", config, file, tagged(&[])).await.unwrap();

        let report = delete_subgraph(tx.as_mut(), 5).await.unwrap();
        assert_eq!(report.vertices_dropped, 1);
        assert_eq!(report.untagged, 3);

        assert!(tx.vertex(config).await.unwrap().is_some());
        assert!(tx.vertex(tech).await.unwrap().is_some());
        assert!(tx.vertex(file).await.unwrap().is_none());
        let kept = tx
            .out_edges(config, &[configuration::TARGET_TECHNOLOGY])
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].property(ISOLATION_TAG_PROP).is_none());
    }

    #[tokio::test]
    async fn test_merge_requires_run_record() {
        let registry = Arc::new(TypeRegistry::builtin().unwrap());
        let repository = AnalysisRepository::new(registry, Arc::new(IdGenerator::new()));
        let merger = GraphMerger::new(ProgressBroadcaster::default(), repository);

        let central = MemoryGraph::new();
        let source = MemoryGraph::from_elements(
            vec![vertex(1, &["FileResource"]), vertex(2, &["FileResource"])],
            vec![edge(3, "child", 1, 2)],
        );

        let err = merger.merge(&central, &source, 5, 77).await.unwrap_err();
        assert!(matches!(err, Error::Merge(_)));
        // Nothing from the aborted merge is visible.
        assert_eq!(central.vertex_count().await, 0);
        assert_eq!(central.edge_count().await, 0);
    }
}
