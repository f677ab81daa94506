//! Analysis and run records stored in the central graph.
//!
//! Records are ordinary vertices: an analysis vertex owns its run vertices
//! through `AnalysisModel-Owns` edges, and each run points at the
//! configuration vertices imported by its merge. Every method works inside a
//! caller-supplied transaction so lifecycle handlers control the commit
//! boundary.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use tackle_core::defaults::ISOLATION_TAG_PROP;
use tackle_core::kinds::VERTEX_FRAME;
use tackle_core::schema::{
    analysis, configuration, effort_report, execution, inline_hint, issue_category,
    java_configuration, package, technology,
};
use tackle_core::{
    from_millis, isolation_tag, to_millis, Analysis, AnalysisStatus, Configuration, ElementId,
    Error, GraphTx, IdGenerator, Issue, PropertyMap, Result, Run, RunRequest,
    StatusUpdate, TypeRegistry, Vertex, VertexFilter,
};

const ANALYSIS_KIND: &str = "AnalysisModel";
const RUN_KIND: &str = "WindupExecutionModel";

/// Post-merge aggregate results of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub total_effort: i64,
    pub issues_per_category: BTreeMap<String, i64>,
}

/// Reads and writes analysis/run records through a graph transaction.
#[derive(Debug, Clone)]
pub struct AnalysisRepository {
    registry: Arc<TypeRegistry>,
    ids: Arc<IdGenerator>,
}

impl AnalysisRepository {
    pub fn new(registry: Arc<TypeRegistry>, ids: Arc<IdGenerator>) -> Self {
        Self { registry, ids }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    // =========================================================================
    // ANALYSES
    // =========================================================================

    /// Create a new analysis in INIT status with a timestamp-derived id.
    pub async fn create_analysis(&self, tx: &mut dyn GraphTx) -> Result<Analysis> {
        let id = self.ids.next_id();
        let created = Utc::now();

        let mut properties = PropertyMap::new();
        properties.insert(analysis::ID.to_string(), json!(id));
        properties.insert(
            analysis::STATUS.to_string(),
            json!(AnalysisStatus::Init.as_str()),
        );
        properties.insert(analysis::CREATED.to_string(), json!(to_millis(created)));

        let tags = self.registry.type_tags_named(ANALYSIS_KIND)?;
        let vertex_id = tx.add_vertex(tags, properties).await?;
        debug!(analysis_id = id, vertex_id, "Analysis created");

        Ok(Analysis {
            id,
            status: AnalysisStatus::Init,
            last_update: None,
            created,
            runs: Vec::new(),
        })
    }

    pub async fn find_analysis_vertex(
        &self,
        tx: &mut dyn GraphTx,
        analysis_id: i64,
    ) -> Result<Vertex> {
        let filter =
            VertexFilter::of_type(analysis::TYPE).with_property(analysis::ID, analysis_id);
        tx.find_vertices(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::AnalysisNotFound(analysis_id))
    }

    /// Analysis with its runs, most recent first.
    pub async fn get_analysis(&self, tx: &mut dyn GraphTx, analysis_id: i64) -> Result<Analysis> {
        let vertex = self.find_analysis_vertex(tx, analysis_id).await?;
        self.analysis_from_vertex(tx, &vertex).await
    }

    pub async fn analysis_status(
        &self,
        tx: &mut dyn GraphTx,
        analysis_id: i64,
    ) -> Result<AnalysisStatus> {
        let vertex = self.find_analysis_vertex(tx, analysis_id).await?;
        Ok(status_of(&vertex))
    }

    /// Every analysis, ordered by the queue time of its latest run, newest first.
    ///
    /// Analyses without runs are ordered by creation time.
    pub async fn list_analyses(&self, tx: &mut dyn GraphTx) -> Result<Vec<Analysis>> {
        let vertices = tx
            .find_vertices(&VertexFilter::of_type(analysis::TYPE))
            .await?;
        let mut analyses = Vec::with_capacity(vertices.len());
        for vertex in &vertices {
            analyses.push(self.analysis_from_vertex(tx, vertex).await?);
        }
        analyses.sort_by_key(|a| {
            Reverse(
                a.latest_run()
                    .and_then(|r| r.time_queued)
                    .unwrap_or(a.created),
            )
        });
        Ok(analyses)
    }

    pub async fn set_status(
        &self,
        tx: &mut dyn GraphTx,
        analysis_id: i64,
        status: AnalysisStatus,
    ) -> Result<()> {
        let vertex = self.find_analysis_vertex(tx, analysis_id).await?;
        tx.set_vertex_property(vertex.id, analysis::STATUS, json!(status.as_str()))
            .await?;
        debug!(analysis_id, status = %status, "Analysis status set");
        Ok(())
    }

    /// Store the most recent event body verbatim.
    pub async fn set_last_update(
        &self,
        tx: &mut dyn GraphTx,
        analysis_id: i64,
        body: &str,
    ) -> Result<()> {
        let vertex = self.find_analysis_vertex(tx, analysis_id).await?;
        tx.set_vertex_property(vertex.id, analysis::LAST_UPDATE, json!(body))
            .await
    }

    async fn analysis_from_vertex(&self, tx: &mut dyn GraphTx, vertex: &Vertex) -> Result<Analysis> {
        let id = vertex
            .i64_property(analysis::ID)
            .ok_or_else(|| Error::Internal(format!("Analysis vertex {} has no id", vertex.id)))?;
        let runs = self.runs_of_vertex(tx, vertex.id).await?;
        let last_update = vertex.str_property(analysis::LAST_UPDATE).map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
        });
        Ok(Analysis {
            id,
            status: status_of(vertex),
            last_update,
            created: vertex
                .i64_property(analysis::CREATED)
                .and_then(from_millis)
                .unwrap_or_default(),
            runs,
        })
    }

    // =========================================================================
    // RUNS
    // =========================================================================

    /// Persist a run for an analysis from the request handed to the worker.
    pub async fn create_run(
        &self,
        tx: &mut dyn GraphTx,
        analysis_id: i64,
        request: &RunRequest,
    ) -> Result<Run> {
        let owner = self.find_analysis_vertex(tx, analysis_id).await?;

        let mut properties = PropertyMap::new();
        properties.insert(execution::ID.to_string(), json!(request.id));
        properties.insert(execution::TIME_QUEUED.to_string(), json!(request.time_queued));
        properties.insert(execution::STATE.to_string(), json!(request.state.as_str()));
        properties.insert(execution::OUTPUT_PATH.to_string(), json!(request.output_path));
        properties.insert(execution::WORK_TOTAL.to_string(), json!(0));
        properties.insert(execution::WORK_COMPLETED.to_string(), json!(0));
        if let Some(ref name) = request.application_file_name {
            properties.insert(execution::APPLICATION_FILE_NAME.to_string(), json!(name));
        }

        let tags = self.registry.type_tags_named(RUN_KIND)?;
        let run_vertex = tx.add_vertex(tags, properties).await?;
        tx.add_edge(analysis::OWNS, owner.id, run_vertex, PropertyMap::new())
            .await?;
        debug!(analysis_id, run_id = request.id, run_vertex, "Run created");

        let vertex = tx
            .vertex(run_vertex)
            .await?
            .ok_or(Error::RunNotFound(request.id))?;
        Ok(run_from_vertex(&vertex, None))
    }

    /// Run vertex for a run id; the most recently queued one wins.
    pub async fn find_run_vertex(&self, tx: &mut dyn GraphTx, run_id: i64) -> Result<Vertex> {
        let filter = VertexFilter::of_type(execution::TYPE).with_property(execution::ID, run_id);
        let mut candidates = tx.find_vertices(&filter).await?;
        sort_runs_desc(&mut candidates);
        candidates
            .into_iter()
            .next()
            .ok_or(Error::RunNotFound(run_id))
    }

    pub async fn get_run(&self, tx: &mut dyn GraphTx, run_id: i64) -> Result<Run> {
        let vertex = self.find_run_vertex(tx, run_id).await?;
        let configuration = self.read_configuration(tx, vertex.id).await?;
        Ok(run_from_vertex(&vertex, configuration))
    }

    /// Runs of an analysis, most recently queued first.
    pub async fn list_runs(&self, tx: &mut dyn GraphTx, analysis_id: i64) -> Result<Vec<Run>> {
        let owner = self.find_analysis_vertex(tx, analysis_id).await?;
        self.runs_of_vertex(tx, owner.id).await
    }

    pub async fn latest_run(&self, tx: &mut dyn GraphTx, analysis_id: i64) -> Result<Option<Run>> {
        Ok(self.list_runs(tx, analysis_id).await?.into_iter().next())
    }

    /// Id of the analysis owning a run vertex.
    pub async fn owner_of_run(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
    ) -> Result<Option<i64>> {
        for edge in tx.in_edges(run_vertex, &[analysis::OWNS]).await? {
            if let Some(owner) = tx.vertex(edge.out_vertex).await? {
                return Ok(owner.i64_property(analysis::ID));
            }
        }
        Ok(None)
    }

    async fn runs_of_vertex(&self, tx: &mut dyn GraphTx, owner: ElementId) -> Result<Vec<Run>> {
        let mut vertices = Vec::new();
        for edge in tx.out_edges(owner, &[analysis::OWNS]).await? {
            if let Some(vertex) = tx.vertex(edge.in_vertex).await? {
                vertices.push(vertex);
            }
        }
        sort_runs_desc(&mut vertices);

        let mut runs = Vec::with_capacity(vertices.len());
        for vertex in &vertices {
            let configuration = self.read_configuration(tx, vertex.id).await?;
            runs.push(run_from_vertex(vertex, configuration));
        }
        Ok(runs)
    }

    /// Copy state, task, and work counters from a worker status message.
    pub async fn apply_status_update(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
        update: &StatusUpdate,
    ) -> Result<()> {
        tx.set_vertex_property(run_vertex, execution::STATE, json!(update.state.as_str()))
            .await?;
        tx.set_vertex_property(
            run_vertex,
            execution::WORK_COMPLETED,
            json!(update.work_completed),
        )
        .await?;
        tx.set_vertex_property(run_vertex, execution::WORK_TOTAL, json!(update.work_total))
            .await?;
        if let Some(ref task) = update.current_task {
            tx.set_vertex_property(run_vertex, execution::CURRENT_TASK, json!(task))
                .await?;
        }
        if let Some(modified) = update.last_modified {
            tx.set_vertex_property(run_vertex, execution::LAST_MODIFIED, json!(modified))
                .await?;
        }
        Ok(())
    }

    /// Set one of the run's timestamp properties.
    pub async fn set_run_time(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
        key: &str,
        time: DateTime<Utc>,
    ) -> Result<()> {
        tx.set_vertex_property(run_vertex, key, json!(to_millis(time)))
            .await
    }

    pub async fn set_output_path(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
        output_path: &str,
    ) -> Result<()> {
        tx.set_vertex_property(run_vertex, execution::OUTPUT_PATH, json!(output_path))
            .await
    }

    /// Point a run at its configuration vertices, replacing earlier links.
    pub async fn attach_configuration(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
        configuration: Option<ElementId>,
        java_configuration: Option<ElementId>,
    ) -> Result<()> {
        let links = [
            (execution::USES_CONFIGURATION, configuration),
            (execution::USES_JAVA_CONFIGURATION, java_configuration),
        ];
        for (label, target) in links {
            let Some(target) = target else {
                continue;
            };
            for edge in tx.out_edges(run_vertex, &[label]).await? {
                tx.drop_edge(edge.id).await?;
            }
            tx.add_edge(label, run_vertex, target, PropertyMap::new())
                .await?;
            debug!(run_vertex, target, label, "Configuration attached");
        }
        Ok(())
    }

    pub async fn store_aggregates(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
        aggregates: &Aggregates,
    ) -> Result<()> {
        tx.set_vertex_property(
            run_vertex,
            execution::TOTAL_STORY_POINT,
            json!(aggregates.total_effort),
        )
        .await?;
        tx.set_vertex_property(
            run_vertex,
            execution::NUMBER_ISSUES_PER_CATEGORY,
            json!(aggregates.issues_per_category),
        )
        .await
    }

    /// Effort total and issue counts per category over the effort reports
    /// carrying an analysis' isolation tag.
    pub async fn compute_aggregates(
        &self,
        tx: &mut dyn GraphTx,
        analysis_id: i64,
    ) -> Result<Aggregates> {
        let filter = VertexFilter::of_type(effort_report::TYPE)
            .with_property(ISOLATION_TAG_PROP, isolation_tag(analysis_id));
        let mut aggregates = Aggregates::default();
        for report in tx.find_vertices(&filter).await? {
            aggregates.total_effort += report.i64_property(effort_report::EFFORT).unwrap_or(0);
            for category in self.category_names(tx, report.id).await? {
                *aggregates.issues_per_category.entry(category).or_insert(0) += 1;
            }
        }
        Ok(aggregates)
    }

    async fn category_names(
        &self,
        tx: &mut dyn GraphTx,
        report: ElementId,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for edge in tx.out_edges(report, &[effort_report::ISSUE_CATEGORY]).await? {
            if let Some(category) = tx.vertex(edge.in_vertex).await? {
                if let Some(name) = category.str_property(issue_category::NAME) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Configuration reachable from a run, if one has been attached.
    pub async fn read_configuration(
        &self,
        tx: &mut dyn GraphTx,
        run_vertex: ElementId,
    ) -> Result<Option<Configuration>> {
        let config = first_target(tx, run_vertex, execution::USES_CONFIGURATION).await?;
        let java = first_target(tx, run_vertex, execution::USES_JAVA_CONFIGURATION).await?;
        if config.is_none() && java.is_none() {
            return Ok(None);
        }

        let mut result = Configuration::default();
        if let Some(config) = config {
            result.sources = target_strings(
                tx,
                config.id,
                configuration::SOURCE_TECHNOLOGY,
                technology::TECHNOLOGY_ID,
            )
            .await?;
            result.targets = target_strings(
                tx,
                config.id,
                configuration::TARGET_TECHNOLOGY,
                technology::TECHNOLOGY_ID,
            )
            .await?;
        }
        if let Some(java) = java {
            result.source_mode = java
                .property(java_configuration::SOURCE_MODE)
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);
            result.packages = target_strings(
                tx,
                java.id,
                java_configuration::SCAN_JAVA_PACKAGES,
                package::NAME,
            )
            .await?;
        }
        Ok(Some(result))
    }

    // =========================================================================
    // ISSUES
    // =========================================================================

    /// Inline hints imported for an analysis, with their resolved kinds.
    pub async fn issues(&self, tx: &mut dyn GraphTx, analysis_id: i64) -> Result<Vec<Issue>> {
        let default_kind = self
            .registry
            .kind_id(VERTEX_FRAME)
            .ok_or_else(|| Error::Internal(format!("Kind '{}' not registered", VERTEX_FRAME)))?;
        let filter = VertexFilter::of_type(inline_hint::TYPE)
            .with_property(ISOLATION_TAG_PROP, isolation_tag(analysis_id));

        let mut issues = Vec::new();
        for vertex in tx.find_vertices(&filter).await? {
            let kinds = self
                .registry
                .resolve_element(&vertex, default_kind)?
                .kind_names();
            let category = self.category_names(tx, vertex.id).await?.into_iter().next();
            issues.push(Issue {
                id: vertex.id,
                kinds,
                title: vertex.str_property(inline_hint::TITLE).map(String::from),
                message: vertex.str_property(inline_hint::MESSAGE).map(String::from),
                rule_id: vertex.str_property(inline_hint::RULE_ID).map(String::from),
                effort: vertex.i64_property(effort_report::EFFORT).unwrap_or(0),
                line_number: vertex.i64_property(inline_hint::LINE_NUMBER),
                category,
            });
        }
        Ok(issues)
    }
}

fn status_of(vertex: &Vertex) -> AnalysisStatus {
    vertex
        .str_property(analysis::STATUS)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn time_property(vertex: &Vertex, key: &str) -> Option<DateTime<Utc>> {
    vertex.i64_property(key).and_then(from_millis)
}

/// Most recently queued first; later-created vertices win ties.
fn sort_runs_desc(vertices: &mut [Vertex]) {
    vertices.sort_by_key(|v| Reverse((v.i64_property(execution::TIME_QUEUED), v.id)));
}

fn run_from_vertex(vertex: &Vertex, configuration: Option<Configuration>) -> Run {
    let issues_per_category = vertex
        .property(execution::NUMBER_ISSUES_PER_CATEGORY)
        .and_then(|value| serde_json::from_value(value.clone()).ok());
    Run {
        vertex_id: vertex.id,
        id: vertex.i64_property(execution::ID).unwrap_or_default(),
        state: vertex
            .str_property(execution::STATE)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        time_queued: time_property(vertex, execution::TIME_QUEUED),
        time_started: time_property(vertex, execution::TIME_STARTED),
        time_finished: time_property(vertex, execution::TIME_FINISHED),
        last_modified: time_property(vertex, execution::LAST_MODIFIED),
        work_total: vertex.i64_property(execution::WORK_TOTAL).unwrap_or(0),
        work_completed: vertex.i64_property(execution::WORK_COMPLETED).unwrap_or(0),
        current_task: vertex
            .str_property(execution::CURRENT_TASK)
            .map(String::from),
        output_path: vertex
            .str_property(execution::OUTPUT_PATH)
            .unwrap_or_default()
            .to_string(),
        application_file_name: vertex
            .str_property(execution::APPLICATION_FILE_NAME)
            .map(String::from),
        total_effort: vertex.i64_property(execution::TOTAL_STORY_POINT),
        issues_per_category,
        configuration,
    }
}

async fn first_target(
    tx: &mut dyn GraphTx,
    vertex: ElementId,
    label: &str,
) -> Result<Option<Vertex>> {
    match tx.out_edges(vertex, &[label]).await?.into_iter().next() {
        Some(edge) => tx.vertex(edge.in_vertex).await,
        None => Ok(None),
    }
}

async fn target_strings(
    tx: &mut dyn GraphTx,
    vertex: ElementId,
    label: &str,
    key: &str,
) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for edge in tx.out_edges(vertex, &[label]).await? {
        if let Some(target) = tx.vertex(edge.in_vertex).await? {
            if let Some(value) = target.str_property(key) {
                values.push(value.to_string());
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;
    use tackle_core::{AnalysisContext, ExecutionState, GraphStore};

    fn repository() -> AnalysisRepository {
        AnalysisRepository::new(
            Arc::new(TypeRegistry::builtin().unwrap()),
            Arc::new(IdGenerator::new()),
        )
    }

    fn request(id: i64, time_queued: i64) -> RunRequest {
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
            application_file_name: Some("app.ear".to_string()),
        }
    }

    #[tokio::test]
    async fn test_new_analysis_defaults_to_init() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let created = repo.create_analysis(tx.as_mut()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let loaded = repo.get_analysis(tx.as_mut(), created.id).await.unwrap();
        assert_eq!(loaded.status, AnalysisStatus::Init);
        assert!(loaded.runs.is_empty());
        assert!(loaded.last_update.is_none());
    }

    #[tokio::test]
    async fn test_missing_analysis_is_not_found() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let err = repo.get_analysis(tx.as_mut(), 99).await.unwrap_err();
        assert!(matches!(err, Error::AnalysisNotFound(99)));
        let err = repo.find_run_vertex(tx.as_mut(), 5).await.unwrap_err();
        assert!(matches!(err, Error::RunNotFound(5)));
    }

    #[tokio::test]
    async fn test_runs_most_recent_first() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let analysis = repo.create_analysis(tx.as_mut()).await.unwrap();
        repo.create_run(tx.as_mut(), analysis.id, &request(1, 1_000))
            .await
            .unwrap();
        repo.create_run(tx.as_mut(), analysis.id, &request(2, 2_000))
            .await
            .unwrap();

        let runs = repo.list_runs(tx.as_mut(), analysis.id).await.unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(runs[0].application_file_name.as_deref(), Some("app.ear"));

        let run_vertex = repo.find_run_vertex(tx.as_mut(), 1).await.unwrap();
        let owner = repo.owner_of_run(tx.as_mut(), run_vertex.id).await.unwrap();
        assert_eq!(owner, Some(analysis.id));
    }

    #[tokio::test]
    async fn test_last_update_round_trips_json_and_text() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let analysis = repo.create_analysis(tx.as_mut()).await.unwrap();

        repo.set_last_update(tx.as_mut(), analysis.id, r#"{"state":"STARTED"}"#)
            .await
            .unwrap();
        let loaded = repo.get_analysis(tx.as_mut(), analysis.id).await.unwrap();
        assert_eq!(loaded.last_update, Some(json!({"state": "STARTED"})));

        repo.set_last_update(tx.as_mut(), analysis.id, "not json")
            .await
            .unwrap();
        let loaded = repo.get_analysis(tx.as_mut(), analysis.id).await.unwrap();
        assert_eq!(loaded.last_update, Some(json!("not json")));
    }

    #[tokio::test]
    async fn test_apply_status_update() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let analysis = repo.create_analysis(tx.as_mut()).await.unwrap();
        let run = repo
            .create_run(tx.as_mut(), analysis.id, &request(11, 1_000))
            .await
            .unwrap();

        let update = StatusUpdate::parse(
            r#"{"id":11,"state":"STARTED","currentTask":"Scanning","workCompleted":3,"workTotal":10,"lastModified":5000}"#,
        )
        .unwrap();
        repo.apply_status_update(tx.as_mut(), run.vertex_id, &update)
            .await
            .unwrap();

        let run = repo.get_run(tx.as_mut(), 11).await.unwrap();
        assert_eq!(run.state, ExecutionState::Started);
        assert_eq!(run.current_task.as_deref(), Some("Scanning"));
        assert_eq!(run.work_completed, 3);
        assert_eq!(run.work_total, 10);
        assert_eq!(run.last_modified, from_millis(5000));
    }

    #[tokio::test]
    async fn test_attach_configuration_replaces_previous_link() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let analysis = repo.create_analysis(tx.as_mut()).await.unwrap();
        let run = repo
            .create_run(tx.as_mut(), analysis.id, &request(3, 1_000))
            .await
            .unwrap();

        let tech = |id: &str| {
            let mut p = PropertyMap::new();
            p.insert(technology::TECHNOLOGY_ID.to_string(), json!(id));
            p
        };
        let first = tx
            .add_vertex(vec![configuration::TYPE.to_string()], PropertyMap::new())
            .await
            .unwrap();
        let second = tx
            .add_vertex(vec![configuration::TYPE.to_string()], PropertyMap::new())
            .await
            .unwrap();
        let eap = tx
            .add_vertex(vec![technology::TYPE.to_string()], tech("eap7"))
            .await
            .unwrap();
        tx.add_edge(configuration::TARGET_TECHNOLOGY, second, eap, PropertyMap::new())
            .await
            .unwrap();

        repo.attach_configuration(tx.as_mut(), run.vertex_id, Some(first), None)
            .await
            .unwrap();
        repo.attach_configuration(tx.as_mut(), run.vertex_id, Some(second), None)
            .await
            .unwrap();

        let links = tx
            .out_edges(run.vertex_id, &[execution::USES_CONFIGURATION])
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].in_vertex, second);

        let config = repo
            .read_configuration(tx.as_mut(), run.vertex_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.targets, vec!["eap7"]);
        assert!(config.sources.is_empty());
    }

    #[tokio::test]
    async fn test_list_analyses_orders_by_latest_run() {
        let store = MemoryGraph::new();
        let repo = repository();
        let mut tx = store.begin().await.unwrap();
        let older = repo.create_analysis(tx.as_mut()).await.unwrap();
        let newer = repo.create_analysis(tx.as_mut()).await.unwrap();
        // The first-created analysis has the most recent run.
        let late = Utc::now().timestamp_millis() + 60_000;
        repo.create_run(tx.as_mut(), older.id, &request(1, late))
            .await
            .unwrap();
        repo.create_run(tx.as_mut(), newer.id, &request(2, 1_000))
            .await
            .unwrap();

        let listed = repo.list_analyses(tx.as_mut()).await.unwrap();
        assert_eq!(
            listed.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![older.id, newer.id]
        );
    }
}
