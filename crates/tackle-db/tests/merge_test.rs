//! Merge engine behaviour against the in-memory central graph.
//!
//! Covers:
//! - full import with aggregates and configuration attachment
//! - re-import of the same analysis replacing the previous subgraph
//! - dangling edges skipped without failing the merge
//! - progress events every 1000 elements plus a terminal event
//! - edge type tags normalised on import
//! - deletion by isolation tag keeping configuration reachable
//! - loading the result graph from an output directory

use std::sync::Arc;

use serde_json::json;

use tackle_core::defaults::{ISOLATION_TAG_PROP, TYPE_PROP};
use tackle_core::schema::configuration;
use tackle_core::{
    isolation_tag, AnalysisContext, Edge, EdgeFilter, ExecutionState, GraphStore, IdGenerator,
    ProgressBroadcaster, ProgressEvent, PropertyMap, RunRequest, SourceGraphOpener,
    TypeRegistry, Vertex, VertexFilter,
};
use tackle_db::test_fixtures::{sample_result_graph, write_result_graph, ResultGraphBuilder};
use tackle_db::{AnalysisRepository, GraphMerger, JsonGraphLoader, MemoryGraph, MERGING_STATE};

struct Fixture {
    central: MemoryGraph,
    repository: AnalysisRepository,
    broadcaster: ProgressBroadcaster,
    merger: GraphMerger,
    analysis_id: i64,
}

fn run_request(id: i64, time_queued: i64) -> RunRequest {
    RunRequest {
        id,
        analysis_context: AnalysisContext {
            advanced_options: Vec::new(),
            include_packages: Vec::new(),
            rules_paths: Vec::new(),
            applications: Vec::new(),
        },
        time_queued,
        state: ExecutionState::Queued,
        output_path: format!("/tmp/{}", id),
        application_file_name: None,
    }
}

async fn setup(run_ids: &[i64]) -> Fixture {
    let registry = Arc::new(TypeRegistry::builtin().expect("builtin registry"));
    let repository = AnalysisRepository::new(registry, Arc::new(IdGenerator::new()));
    let broadcaster = ProgressBroadcaster::new(64);
    let merger = GraphMerger::new(broadcaster.clone(), repository.clone());
    let central = MemoryGraph::new();

    let mut tx = central.begin().await.unwrap();
    let analysis = repository.create_analysis(tx.as_mut()).await.unwrap();
    for (i, run_id) in run_ids.iter().enumerate() {
        repository
            .create_run(tx.as_mut(), analysis.id, &run_request(*run_id, 1_000 + i as i64))
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    Fixture {
        central,
        repository,
        broadcaster,
        merger,
        analysis_id: analysis.id,
    }
}

async fn tagged_counts(store: &MemoryGraph, analysis_id: i64) -> (u64, u64) {
    let mut tx = store.begin().await.unwrap();
    let vertices = tx
        .count_vertices(
            &VertexFilter::all().with_property(ISOLATION_TAG_PROP, isolation_tag(analysis_id)),
        )
        .await
        .unwrap();
    let edges = tx
        .count_edges(
            &EdgeFilter::all().with_property(ISOLATION_TAG_PROP, isolation_tag(analysis_id)),
        )
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    (vertices, edges)
}

#[tokio::test]
async fn test_merge_imports_graph_and_aggregates() {
    let f = setup(&[501]).await;
    let doc = sample_result_graph().build();
    let (vertex_total, edge_total) = (doc.vertices.len() as u64, doc.edges.len() as u64);
    let source = doc.into_store();

    let report = f
        .merger
        .merge(&f.central, &source, f.analysis_id, 501)
        .await
        .unwrap();

    assert_eq!(report.vertices_imported, vertex_total);
    assert_eq!(report.edges_imported, edge_total);
    assert_eq!(report.edges_skipped, 0);
    assert_eq!(report.total_effort, 9);
    assert_eq!(report.issues_per_category.get("mandatory"), Some(&2));
    assert_eq!(report.issues_per_category.get("optional"), Some(&1));
    assert!(report.configuration_attached);

    assert_eq!(
        tagged_counts(&f.central, f.analysis_id).await,
        (vertex_total, edge_total)
    );

    let mut tx = f.central.begin().await.unwrap();
    let run = f.repository.get_run(tx.as_mut(), 501).await.unwrap();
    assert_eq!(run.total_effort, Some(9));
    let config = run.configuration.expect("configuration attached");
    assert_eq!(config.sources, vec!["eap6"]);
    assert_eq!(config.targets, vec!["eap7", "quarkus"]);
    assert_eq!(config.packages, vec!["com.acme"]);
    assert!(!config.source_mode);

    let issues = f.repository.issues(tx.as_mut(), f.analysis_id).await.unwrap();
    assert_eq!(issues.len(), 3);
    assert!(issues
        .iter()
        .all(|i| i.kinds == vec!["InlineHintModel".to_string()]));
}

#[tokio::test]
async fn test_merge_twice_is_idempotent() {
    let f = setup(&[502]).await;
    let source = sample_result_graph().build_store();

    f.merger
        .merge(&f.central, &source, f.analysis_id, 502)
        .await
        .unwrap();
    let once = tagged_counts(&f.central, f.analysis_id).await;

    f.merger
        .merge(&f.central, &source, f.analysis_id, 502)
        .await
        .unwrap();
    let twice = tagged_counts(&f.central, f.analysis_id).await;

    assert_eq!(once, twice);

    // Still exactly one configuration link on the run.
    let mut tx = f.central.begin().await.unwrap();
    let run = f.repository.find_run_vertex(tx.as_mut(), 502).await.unwrap();
    let links = tx
        .out_edges(run.id, &[tackle_core::schema::execution::USES_CONFIGURATION])
        .await
        .unwrap();
    assert_eq!(links.len(), 1);
}

#[tokio::test]
async fn test_dangling_edge_is_skipped() {
    let f = setup(&[503]).await;
    let source = ResultGraphBuilder::new()
        .with_plain_vertices(3)
        .with_dangling_edge("child")
        .build_store();

    let report = f
        .merger
        .merge(&f.central, &source, f.analysis_id, 503)
        .await
        .unwrap();

    assert_eq!(report.vertices_imported, 4);
    assert_eq!(report.edges_imported, 0);
    assert_eq!(report.edges_skipped, 1);
    assert!(!report.configuration_attached);
    assert_eq!(tagged_counts(&f.central, f.analysis_id).await, (4, 0));
}

#[tokio::test]
async fn test_progress_events_every_thousand_elements() {
    let f = setup(&[504]).await;
    let source = ResultGraphBuilder::new()
        .with_plain_vertices(2500)
        .build_store();
    let mut subscription = f.broadcaster.subscribe();

    f.merger
        .merge(&f.central, &source, f.analysis_id, 504)
        .await
        .unwrap();

    let events: Vec<ProgressEvent> = subscription
        .drain()
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect();
    assert!(events.iter().all(|e| e.state == MERGING_STATE));
    assert!(events.iter().all(|e| e.id == f.analysis_id));
    assert!(events.iter().all(|e| e.total_work == 2500));

    let completed: Vec<i64> = events.iter().map(|e| e.work_completed).collect();
    assert_eq!(completed, vec![1000, 2000, 2500]);
    assert!(events.last().unwrap().is_finished());
}

#[tokio::test]
async fn test_progress_total_on_interval_boundary_sent_once() {
    let f = setup(&[507]).await;
    let source = ResultGraphBuilder::new()
        .with_plain_vertices(2000)
        .build_store();
    let mut subscription = f.broadcaster.subscribe();

    f.merger
        .merge(&f.central, &source, f.analysis_id, 507)
        .await
        .unwrap();

    let completed: Vec<i64> = subscription
        .drain()
        .iter()
        .map(|raw| serde_json::from_str::<ProgressEvent>(raw).unwrap().work_completed)
        .collect();
    assert_eq!(completed, vec![1000, 2000]);
}

#[tokio::test]
async fn test_edge_type_tags_rejoined_on_import() {
    let f = setup(&[508]).await;
    let file = |id| Vertex {
        id,
        type_tags: vec!["FileResource".to_string()],
        properties: PropertyMap::new(),
    };
    let mut tagged = PropertyMap::new();
    tagged.insert(TYPE_PROP.to_string(), json!("A||B|"));
    tagged.insert("note".to_string(), json!("kept"));
    let source = MemoryGraph::from_elements(
        vec![file(1), file(2)],
        vec![
            Edge {
                id: 3,
                label: "child".to_string(),
                out_vertex: 1,
                in_vertex: 2,
                properties: tagged,
            },
            Edge {
                id: 4,
                label: "sibling".to_string(),
                out_vertex: 2,
                in_vertex: 1,
                properties: PropertyMap::new(),
            },
        ],
    );

    let report = f
        .merger
        .merge(&f.central, &source, f.analysis_id, 508)
        .await
        .unwrap();
    assert_eq!(report.edges_imported, 2);

    let mut tx = f.central.begin().await.unwrap();
    let child = tx
        .find_edges(&EdgeFilter::labelled("child"))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(child.property(TYPE_PROP), Some(&json!("A|B")));
    assert_eq!(child.type_tags(), vec!["A", "B"]);
    assert_eq!(child.property("note"), Some(&json!("kept")));
    let sibling = tx
        .find_edges(&EdgeFilter::labelled("sibling"))
        .await
        .unwrap()
        .remove(0);
    assert!(sibling.property(TYPE_PROP).is_none());
    assert_eq!(sibling.property(ISOLATION_TAG_PROP), Some(&isolation_tag(f.analysis_id)));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_delete_keeps_configuration_reachable() {
    let f = setup(&[505]).await;
    let source = sample_result_graph().build_store();
    f.merger
        .merge(&f.central, &source, f.analysis_id, 505)
        .await
        .unwrap();

    let report = f
        .merger
        .delete_analysis_graph(&f.central, f.analysis_id)
        .await
        .unwrap();
    assert!(report.vertices_dropped > 0);
    assert_eq!(tagged_counts(&f.central, f.analysis_id).await, (0, 0));

    let mut tx = f.central.begin().await.unwrap();
    let run = f.repository.get_run(tx.as_mut(), 505).await.unwrap();
    let config = run.configuration.expect("configuration still reachable");
    assert_eq!(config.targets, vec!["eap7", "quarkus"]);
    assert_eq!(config.packages, vec!["com.acme"]);
    let hints = f.repository.issues(tx.as_mut(), f.analysis_id).await.unwrap();
    assert!(hints.is_empty());
}

#[tokio::test]
async fn test_rerun_keeps_previous_run_configuration() {
    let f = setup(&[506, 507]).await;
    let first = ResultGraphBuilder::new()
        .with_configuration(&[], &["eap7"])
        .build_store();
    let second = ResultGraphBuilder::new()
        .with_configuration(&[], &["quarkus"])
        .with_plain_vertices(2)
        .build_store();

    f.merger
        .merge(&f.central, &first, f.analysis_id, 506)
        .await
        .unwrap();
    f.merger
        .merge(&f.central, &second, f.analysis_id, 507)
        .await
        .unwrap();

    let mut tx = f.central.begin().await.unwrap();
    let old = f.repository.get_run(tx.as_mut(), 506).await.unwrap();
    let new = f.repository.get_run(tx.as_mut(), 507).await.unwrap();
    assert_eq!(old.configuration.unwrap().targets, vec!["eap7"]);
    assert_eq!(new.configuration.unwrap().targets, vec!["quarkus"]);

    // Only the second run's configuration carries the tag.
    let tagged_configs = tx
        .count_vertices(
            &VertexFilter::of_type(configuration::TYPE)
                .with_property(ISOLATION_TAG_PROP, isolation_tag(f.analysis_id)),
        )
        .await
        .unwrap();
    assert_eq!(tagged_configs, 1);
}

#[tokio::test]
async fn test_merge_from_output_directory() {
    let f = setup(&[508]).await;
    let dir = tempfile::tempdir().unwrap();
    write_result_graph(dir.path(), &sample_result_graph().build())
        .await
        .unwrap();

    let output_path = dir.path().to_string_lossy().to_string();
    let source = JsonGraphLoader::new().open(&output_path).await.unwrap();
    let report = f
        .merger
        .merge(&f.central, source.as_ref(), f.analysis_id, 508)
        .await
        .unwrap();

    assert_eq!(report.total_effort, 9);
    assert!(report.configuration_attached);
}
