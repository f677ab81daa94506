//! Run submission gateway.
//!
//! Builds the run request handed to the analysis worker and enqueues it, or
//! enqueues a cancellation. Both return as soon as the message is queued.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use tackle_core::{
    AdvancedOption, AnalysisContext, CancelRequest, Destination, ExecutionState, IdGenerator,
    MessageQueue, Package, QueueMessage, RegisteredApplication, Result, RulesPath,
    RulesPathType, RunOptions, RunRequest,
};

use crate::config::ServiceConfig;

/// Advanced option names understood by the worker.
pub mod option_names {
    pub const TARGET: &str = "target";
    pub const SOURCE: &str = "source";
    pub const SOURCE_MODE: &str = "sourceMode";
}

/// Enqueues run and cancellation requests for the analysis worker.
#[derive(Clone)]
pub struct SubmissionGateway {
    queue: Arc<dyn MessageQueue>,
    ids: Arc<IdGenerator>,
    config: ServiceConfig,
}

impl SubmissionGateway {
    pub fn new(queue: Arc<dyn MessageQueue>, ids: Arc<IdGenerator>, config: ServiceConfig) -> Self {
        Self { queue, ids, config }
    }

    /// Describe one run of `application_path` for an analysis.
    pub fn build_request(
        &self,
        analysis_id: i64,
        application_path: &str,
        options: &RunOptions,
    ) -> RunRequest {
        let mut advanced_options: Vec<AdvancedOption> = options
            .targets
            .iter()
            .map(|t| AdvancedOption::new(option_names::TARGET, t.trim()))
            .collect();
        advanced_options.extend(
            options
                .sources
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| AdvancedOption::new(option_names::SOURCE, s.trim())),
        );
        advanced_options.push(AdvancedOption::new(
            option_names::SOURCE_MODE,
            options.source_mode.to_string(),
        ));

        let include_packages = options
            .packages
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Package {
                name: p.trim().to_string(),
            })
            .collect();

        RunRequest {
            id: self.ids.next_id(),
            analysis_context: AnalysisContext {
                advanced_options,
                include_packages,
                rules_paths: vec![RulesPath {
                    path: self.config.system_rules_path.clone(),
                    scan_recursively: true,
                    rules_path_type: RulesPathType::SystemProvided,
                }],
                applications: vec![RegisteredApplication {
                    input_path: application_path.to_string(),
                }],
            },
            time_queued: Utc::now().timestamp_millis(),
            state: ExecutionState::Queued,
            output_path: self
                .config
                .output_path_for(analysis_id)
                .to_string_lossy()
                .to_string(),
            application_file_name: None,
        }
    }

    /// Validate options, enqueue a run request, and return it.
    #[instrument(
        skip(self, options),
        fields(subsystem = "jobs", component = "gateway", op = "submit")
    )]
    pub async fn submit(
        &self,
        analysis_id: i64,
        application_path: &str,
        options: &RunOptions,
    ) -> Result<RunRequest> {
        options.validate()?;
        let request = self.build_request(analysis_id, application_path, options);
        self.dispatch(analysis_id, &request).await?;
        Ok(request)
    }

    /// Enqueue an already built run request.
    pub async fn dispatch(&self, analysis_id: i64, request: &RunRequest) -> Result<()> {
        let message = QueueMessage::json(request, analysis_id, request.id)?;
        info!(
            analysis_id,
            run_id = request.id,
            output_path = %request.output_path,
            "Enqueuing run request"
        );
        self.queue.send(Destination::ExecutorQueue, message).await
    }

    /// Ask the worker to stop a run.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "gateway", op = "cancel"))]
    pub async fn cancel(&self, analysis_id: i64, run_id: i64) -> Result<()> {
        let message = QueueMessage::json(&CancelRequest { id: run_id }, analysis_id, run_id)?;
        info!(analysis_id, run_id, "Enqueuing cancellation request");
        self.queue
            .send(Destination::ExecutorCancellation, message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ChannelBroker;

    fn gateway(broker: Arc<ChannelBroker>) -> SubmissionGateway {
        SubmissionGateway::new(
            broker,
            Arc::new(IdGenerator::new()),
            ServiceConfig::default().with_shared_folder_path("/srv/shared"),
        )
    }

    #[test]
    fn test_build_request() {
        let gateway = gateway(Arc::new(ChannelBroker::new()));
        let options = RunOptions::from_csv(Some("eap6"), "eap7, quarkus", Some("com.acme"), true)
            .unwrap();
        let request = gateway.build_request(42, "/srv/shared/app.ear", &options);

        let context = &request.analysis_context;
        let targets: Vec<&str> = context
            .advanced_options
            .iter()
            .filter(|o| o.name == option_names::TARGET)
            .map(|o| o.value.as_str())
            .collect();
        assert_eq!(targets, vec!["eap7", "quarkus"]);
        assert_eq!(context.option(option_names::SOURCE), Some("eap6"));
        assert_eq!(context.option(option_names::SOURCE_MODE), Some("true"));
        assert_eq!(context.include_packages[0].name, "com.acme");
        assert_eq!(context.rules_paths[0].path, "/opt/mta-cli/rules");
        assert!(context.rules_paths[0].scan_recursively);
        assert_eq!(context.applications[0].input_path, "/srv/shared/app.ear");
        assert_eq!(request.state, ExecutionState::Queued);
        assert_eq!(request.output_path, "/srv/shared/42");
    }

    #[test]
    fn test_build_request_without_sources() {
        let gateway = gateway(Arc::new(ChannelBroker::new()));
        let options = RunOptions::from_csv(None, "eap7", None, false).unwrap();
        let request = gateway.build_request(1, "/a.war", &options);
        assert!(request.analysis_context.option(option_names::SOURCE).is_none());
        assert!(request.analysis_context.include_packages.is_empty());
    }

    #[tokio::test]
    async fn test_submit_enqueues_request() {
        let broker = Arc::new(ChannelBroker::new());
        let gateway = gateway(Arc::clone(&broker));
        let options = RunOptions::from_csv(None, "eap7", None, false).unwrap();
        let request = gateway.submit(42, "/a.war", &options).await.unwrap();

        let message = broker
            .try_receive(Destination::ExecutorQueue)
            .await
            .unwrap();
        assert_eq!(message.attributes.analysis_id, 42);
        assert_eq!(message.attributes.run_id, request.id);
        let sent: RunRequest = serde_json::from_str(&message.body).unwrap();
        assert_eq!(sent, request);
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_target() {
        let broker = Arc::new(ChannelBroker::new());
        let gateway = gateway(Arc::clone(&broker));
        let options = RunOptions::default();
        assert!(gateway.submit(1, "/a.war", &options).await.is_err());
        assert!(broker
            .try_receive(Destination::ExecutorQueue)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_cancel_enqueues_run_id() {
        let broker = Arc::new(ChannelBroker::new());
        let gateway = gateway(Arc::clone(&broker));
        gateway.cancel(42, 4200).await.unwrap();

        let message = broker
            .try_receive(Destination::ExecutorCancellation)
            .await
            .unwrap();
        let body: CancelRequest = serde_json::from_str(&message.body).unwrap();
        assert_eq!(body.id, 4200);
        assert_eq!(message.attributes.analysis_id, 42);
    }
}
