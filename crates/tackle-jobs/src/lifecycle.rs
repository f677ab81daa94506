//! Run lifecycle manager.
//!
//! Applies worker status messages to the central graph and drives the
//! client-initiated cancel/delete flow. Every status message is applied in
//! one transaction; a COMPLETED message additionally commits MERGING before
//! the merge starts so readers observe it while the import is running.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use tackle_core::schema::execution;
use tackle_core::{
    from_millis, AnalysisStatus, ExecutionState, GraphStore, ProgressBroadcaster, ProgressEvent,
    QueueMessage, Result, SourceGraphOpener, StatusUpdate,
};
use tackle_db::{AnalysisRepository, GraphMerger, MergeReport};

use crate::cleanup;
use crate::gateway::SubmissionGateway;

/// Milestone state names broadcast around a merge and a delete.
pub mod milestones {
    pub const MERGING: &str = "MERGING";
    pub const MERGED: &str = "MERGED";
    pub const DELETE: &str = "DELETE";

    pub const MERGING_TASK: &str = "Merging into central graph";
    pub const MERGED_TASK: &str = "Merged into central graph";
    pub const CANCEL_TASK: &str = "Cancel ongoing analysis";
    pub const DELETE_GRAPH_TASK: &str = "Delete analysis graph";
}

/// What applying one status message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub analysis_id: i64,
    pub run_id: i64,
    pub state: ExecutionState,
    /// Present when the message completed a run and its graph was merged.
    pub merge: Option<MergeReport>,
}

/// Drives analysis and run state from worker messages and client deletes.
pub struct LifecycleManager {
    central: Arc<dyn GraphStore>,
    sources: Arc<dyn SourceGraphOpener>,
    repository: AnalysisRepository,
    merger: GraphMerger,
    broadcaster: ProgressBroadcaster,
    gateway: SubmissionGateway,
}

impl LifecycleManager {
    pub fn new(
        central: Arc<dyn GraphStore>,
        sources: Arc<dyn SourceGraphOpener>,
        repository: AnalysisRepository,
        merger: GraphMerger,
        broadcaster: ProgressBroadcaster,
        gateway: SubmissionGateway,
    ) -> Self {
        Self {
            central,
            sources,
            repository,
            merger,
            broadcaster,
            gateway,
        }
    }

    /// Apply one worker status message.
    ///
    /// Errors are not retried; the caller decides whether the consuming loop
    /// survives them.
    #[instrument(
        skip(self, message),
        fields(
            subsystem = "jobs",
            component = "lifecycle",
            op = "status",
            analysis_id = message.attributes.analysis_id,
            run_id = message.attributes.run_id
        )
    )]
    pub async fn handle_message(&self, message: &QueueMessage) -> Result<Applied> {
        let update = StatusUpdate::parse(&message.body)?;
        self.broadcaster.publish(message.body.as_str());

        let mut tx = self.central.begin().await?;
        let run_vertex = self.repository.find_run_vertex(tx.as_mut(), update.id).await?;
        let analysis_id = match self.repository.owner_of_run(tx.as_mut(), run_vertex.id).await? {
            Some(owner) => owner,
            None => message.attributes.analysis_id,
        };

        self.repository
            .apply_status_update(tx.as_mut(), run_vertex.id, &update)
            .await?;
        self.repository
            .set_last_update(tx.as_mut(), analysis_id, &message.body)
            .await?;

        let mut applied = Applied {
            analysis_id,
            run_id: update.id,
            state: update.state,
            merge: None,
        };

        match update.state {
            ExecutionState::Queued => {
                let queued = millis_or_now(update.time_queued);
                self.repository
                    .set_run_time(tx.as_mut(), run_vertex.id, execution::TIME_QUEUED, queued)
                    .await?;
                tx.commit().await?;
            }
            ExecutionState::Started => {
                let started = millis_or_now(update.time_started);
                self.repository
                    .set_run_time(tx.as_mut(), run_vertex.id, execution::TIME_STARTED, started)
                    .await?;
                self.repository
                    .set_status(tx.as_mut(), analysis_id, AnalysisStatus::Started)
                    .await?;
                tx.commit().await?;
                info!(analysis_id, run_id = update.id, "Run started");
            }
            ExecutionState::Failed => {
                self.repository
                    .set_run_time(tx.as_mut(), run_vertex.id, execution::TIME_FINISHED, Utc::now())
                    .await?;
                tx.commit().await?;
                warn!(
                    analysis_id,
                    run_id = update.id,
                    task = update.current_task.as_deref().unwrap_or_default(),
                    "Run failed, analysis status left unchanged"
                );
            }
            ExecutionState::Cancelled => {
                self.repository
                    .set_run_time(tx.as_mut(), run_vertex.id, execution::TIME_FINISHED, Utc::now())
                    .await?;
                let status = self
                    .repository
                    .analysis_status(tx.as_mut(), analysis_id)
                    .await?;
                tx.commit().await?;
                info!(analysis_id, run_id = update.id, status = %status, "Run cancelled");

                if matches!(status, AnalysisStatus::Cancelled | AnalysisStatus::Deleted) {
                    let output_path = run_vertex
                        .str_property(execution::OUTPUT_PATH)
                        .unwrap_or_default();
                    if let Err(e) = cleanup::remove_output(output_path).await {
                        warn!(analysis_id, output_path, error = %e, "Failed to remove run output");
                    }
                }
            }
            ExecutionState::Completed => {
                let output_path = match update.output_path {
                    Some(ref path) => {
                        self.repository
                            .set_output_path(tx.as_mut(), run_vertex.id, path)
                            .await?;
                        path.clone()
                    }
                    None => run_vertex
                        .str_property(execution::OUTPUT_PATH)
                        .unwrap_or_default()
                        .to_string(),
                };
                self.repository
                    .set_status(tx.as_mut(), analysis_id, AnalysisStatus::Merging)
                    .await?;
                tx.commit().await?;

                let report = self
                    .merge_completed(analysis_id, update.id, &output_path, update.time_completed)
                    .await?;
                applied.merge = Some(report);
            }
        }

        debug!(analysis_id, run_id = update.id, state = %update.state, "Status message applied");
        Ok(applied)
    }

    async fn merge_completed(
        &self,
        analysis_id: i64,
        run_id: i64,
        output_path: &str,
        time_completed: Option<i64>,
    ) -> Result<MergeReport> {
        self.broadcaster.publish_event(&ProgressEvent::new(
            analysis_id,
            milestones::MERGING,
            milestones::MERGING_TASK,
            1,
            0,
        ));

        let source = self.sources.open(output_path).await?;
        let report = self
            .merger
            .merge(self.central.as_ref(), source.as_ref(), analysis_id, run_id)
            .await?;

        let mut tx = self.central.begin().await?;
        let run_vertex = self.repository.find_run_vertex(tx.as_mut(), run_id).await?;
        self.repository
            .set_run_time(
                tx.as_mut(),
                run_vertex.id,
                execution::TIME_FINISHED,
                millis_or_now(time_completed),
            )
            .await?;
        self.repository
            .set_status(tx.as_mut(), analysis_id, AnalysisStatus::Completed)
            .await?;
        tx.commit().await?;

        self.broadcaster.publish_event(&ProgressEvent::new(
            analysis_id,
            milestones::MERGED,
            milestones::MERGED_TASK,
            1,
            1,
        ));
        info!(analysis_id, run_id, "Run completed and merged");
        Ok(report)
    }

    /// Cancel an analysis' ongoing run and remove its imported graph.
    ///
    /// A completed analysis becomes DELETED and its output directory is
    /// removed; anything else becomes CANCELLED and only the generated
    /// reports are removed, the rest waiting for the worker's acknowledgement.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "lifecycle", op = "delete"))]
    pub async fn delete_analysis(&self, analysis_id: i64) -> Result<AnalysisStatus> {
        let mut tx = self.central.begin().await?;
        let current = self
            .repository
            .analysis_status(tx.as_mut(), analysis_id)
            .await?;
        let latest = self.repository.latest_run(tx.as_mut(), analysis_id).await?;
        tx.rollback().await?;

        self.broadcaster.publish_event(&ProgressEvent::new(
            analysis_id,
            milestones::DELETE,
            milestones::CANCEL_TASK,
            1,
            0,
        ));
        let run_id = latest.as_ref().map(|r| r.id).unwrap_or(analysis_id);
        self.gateway.cancel(analysis_id, run_id).await?;

        self.broadcaster.publish_event(&ProgressEvent::new(
            analysis_id,
            milestones::DELETE,
            milestones::DELETE_GRAPH_TASK,
            1,
            1,
        ));

        let next = current.next_on_delete();
        self.merger
            .delete_analysis_graph(self.central.as_ref(), analysis_id)
            .await?;

        let mut tx = self.central.begin().await?;
        self.repository
            .set_status(tx.as_mut(), analysis_id, next)
            .await?;
        tx.commit().await?;
        info!(analysis_id, from = %current, to = %next, "Analysis deleted");

        if let Some(output_path) = latest.as_ref().map(|r| r.output_path.as_str()) {
            let removed = match next {
                AnalysisStatus::Deleted => cleanup::remove_output(output_path).await,
                _ => cleanup::remove_reports(output_path).await,
            };
            if let Err(e) = removed {
                warn!(analysis_id, output_path, error = %e, "Failed to clean up run output");
            }
        }
        Ok(next)
    }
}

fn millis_or_now(millis: Option<i64>) -> DateTime<Utc> {
    millis.and_then(from_millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_or_now() {
        assert_eq!(millis_or_now(Some(1_000)).timestamp_millis(), 1_000);
        let before = Utc::now();
        assert!(millis_or_now(None) >= before);
    }

    #[test]
    fn test_milestone_events_shape() {
        let event = ProgressEvent::new(42, milestones::MERGED, milestones::MERGED_TASK, 1, 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 42,
                "state": "MERGED",
                "currentTask": "Merged into central graph",
                "totalWork": 1,
                "workCompleted": 1
            })
        );
        assert!(event.is_finished());
    }
}
