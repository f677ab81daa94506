//! Analysis service facade.
//!
//! The operations behind the HTTP surface: submit and re-run analyses,
//! delete them, and read their state back. Every read opens a fresh
//! transaction so it observes the latest committed state.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use tackle_core::{
    Analysis, AnalysisStatus, GraphStore, Issue, ProgressBroadcaster, ProgressEvent, Result,
    Run, RunOptions, Subscription,
};
use tackle_db::AnalysisRepository;

use crate::config::ServiceConfig;
use crate::gateway::SubmissionGateway;
use crate::lifecycle::LifecycleManager;

/// Milestones broadcast while an analysis is submitted.
pub mod init_milestones {
    pub const STATE: &str = "INIT";
    pub const TOTAL: i64 = 2;

    pub const STORING: &str = "Storing application";
    pub const TRIGGERING: &str = "Triggering the analysis";
    pub const WAITING: &str = "Analysis waiting to be executed";
}

/// An application to analyse and how.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Application path; relative paths are resolved against the shared folder.
    pub application_path: String,
    /// Original upload name, kept for display.
    pub application_file_name: Option<String>,
    pub options: RunOptions,
}

impl Submission {
    pub fn new(application_path: impl Into<String>, options: RunOptions) -> Self {
        Self {
            application_path: application_path.into(),
            application_file_name: None,
            options,
        }
    }

    pub fn with_application_file_name(mut self, name: impl Into<String>) -> Self {
        self.application_file_name = Some(name.into());
        self
    }
}

/// Submission, deletion, and read operations over analyses.
#[derive(Clone)]
pub struct AnalysisService {
    central: Arc<dyn GraphStore>,
    repository: AnalysisRepository,
    gateway: SubmissionGateway,
    lifecycle: Arc<LifecycleManager>,
    broadcaster: ProgressBroadcaster,
    config: ServiceConfig,
}

impl AnalysisService {
    pub fn new(
        central: Arc<dyn GraphStore>,
        repository: AnalysisRepository,
        gateway: SubmissionGateway,
        lifecycle: Arc<LifecycleManager>,
        broadcaster: ProgressBroadcaster,
        config: ServiceConfig,
    ) -> Self {
        Self {
            central,
            repository,
            gateway,
            lifecycle,
            broadcaster,
            config,
        }
    }

    /// Attach a live progress subscriber.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Create an analysis and submit its first run.
    #[instrument(skip(self, submission), fields(subsystem = "jobs", component = "service", op = "create"))]
    pub async fn create_analysis(&self, submission: Submission) -> Result<Analysis> {
        submission.options.validate()?;

        let mut tx = self.central.begin().await?;
        let analysis = self.repository.create_analysis(tx.as_mut()).await?;
        tx.commit().await?;
        info!(analysis_id = analysis.id, "Analysis created");

        self.submit_run(analysis.id, submission).await
    }

    /// Submit a new run for an existing analysis, replacing its results once merged.
    #[instrument(skip(self, submission), fields(subsystem = "jobs", component = "service", op = "rerun"))]
    pub async fn rerun_analysis(&self, analysis_id: i64, submission: Submission) -> Result<Analysis> {
        submission.options.validate()?;

        let mut tx = self.central.begin().await?;
        self.repository
            .find_analysis_vertex(tx.as_mut(), analysis_id)
            .await?;
        tx.rollback().await?;

        self.submit_run(analysis_id, submission).await
    }

    async fn submit_run(&self, analysis_id: i64, submission: Submission) -> Result<Analysis> {
        self.milestone(analysis_id, init_milestones::STORING, 0);
        let mut tx = self.central.begin().await?;
        self.repository
            .set_status(tx.as_mut(), analysis_id, AnalysisStatus::Init)
            .await?;
        tx.commit().await?;

        self.milestone(analysis_id, init_milestones::TRIGGERING, 1);
        let application_path = self.resolve_application_path(&submission.application_path);
        let mut request =
            self.gateway
                .build_request(analysis_id, &application_path, &submission.options);
        request.application_file_name = submission.application_file_name;

        // The run record exists before the worker can report on it.
        let mut tx = self.central.begin().await?;
        self.repository
            .create_run(tx.as_mut(), analysis_id, &request)
            .await?;
        tx.commit().await?;
        self.gateway.dispatch(analysis_id, &request).await?;

        self.milestone(analysis_id, init_milestones::WAITING, 2);
        info!(analysis_id, run_id = request.id, "Run submitted");
        self.get_analysis(analysis_id).await
    }

    fn milestone(&self, analysis_id: i64, task: &str, completed: i64) {
        self.broadcaster.publish_event(&ProgressEvent::new(
            analysis_id,
            init_milestones::STATE,
            task,
            init_milestones::TOTAL,
            completed,
        ));
    }

    fn resolve_application_path(&self, path: &str) -> String {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_string_lossy().to_string()
        } else {
            self.config
                .shared_folder_path
                .join(path)
                .to_string_lossy()
                .to_string()
        }
    }

    /// Cancel and remove an analysis; returns its new status.
    pub async fn delete_analysis(&self, analysis_id: i64) -> Result<AnalysisStatus> {
        self.lifecycle.delete_analysis(analysis_id).await
    }

    pub async fn get_analysis(&self, analysis_id: i64) -> Result<Analysis> {
        let mut tx = self.central.begin().await?;
        let analysis = self.repository.get_analysis(tx.as_mut(), analysis_id).await;
        tx.rollback().await?;
        analysis
    }

    pub async fn analysis_status(&self, analysis_id: i64) -> Result<AnalysisStatus> {
        let mut tx = self.central.begin().await?;
        let status = self
            .repository
            .analysis_status(tx.as_mut(), analysis_id)
            .await;
        tx.rollback().await?;
        status
    }

    pub async fn list_analyses(&self) -> Result<Vec<Analysis>> {
        let mut tx = self.central.begin().await?;
        let analyses = self.repository.list_analyses(tx.as_mut()).await;
        tx.rollback().await?;
        analyses
    }

    /// Runs of an analysis, most recent first.
    pub async fn list_runs(&self, analysis_id: i64) -> Result<Vec<Run>> {
        let mut tx = self.central.begin().await?;
        let runs = self.repository.list_runs(tx.as_mut(), analysis_id).await;
        tx.rollback().await?;
        runs
    }

    /// Issues imported for an analysis.
    pub async fn issues(&self, analysis_id: i64) -> Result<Vec<Issue>> {
        let mut tx = self.central.begin().await?;
        self.repository
            .find_analysis_vertex(tx.as_mut(), analysis_id)
            .await?;
        let issues = self.repository.issues(tx.as_mut(), analysis_id).await;
        tx.rollback().await?;
        issues
    }
}
