//! # tackle-jobs
//!
//! Run submission, lifecycle handling, and status consumers for the tackle
//! analysis hub.
//!
//! This crate provides:
//! - An in-process message broker for single-process deployments and tests
//! - The submission gateway that hands run requests to the analysis worker
//! - The lifecycle manager applying worker status messages and client deletes
//! - A supervised status consumer
//! - The [`AnalysisService`] facade used by the HTTP surface
//!
//! # Example
//!
//! ```ignore
//! use tackle_jobs::{Hub, ServiceConfig};
//!
//! let hub = Hub::new(central, queue, sources, registry, ServiceConfig::from_env());
//! let consumer = hub.supervisor().start();
//! let analysis = hub.service.create_analysis(submission).await?;
//! ```

pub mod broker;
pub mod cleanup;
pub mod config;
pub mod consumer;
pub mod gateway;
pub mod lifecycle;
pub mod service;

use std::sync::Arc;

use tackle_core::{
    GraphStore, IdGenerator, MessageQueue, ProgressBroadcaster, SourceGraphOpener, TypeRegistry,
};
use tackle_db::{AnalysisRepository, GraphMerger};

pub use broker::ChannelBroker;
pub use config::ServiceConfig;
pub use consumer::{ConsumerEvent, ConsumerExit, ConsumerHandle, StatusConsumer, Supervisor};
pub use gateway::SubmissionGateway;
pub use lifecycle::{Applied, LifecycleManager};
pub use service::{AnalysisService, Submission};

/// The hub's components wired over one central store and one transport.
pub struct Hub {
    pub service: AnalysisService,
    pub lifecycle: Arc<LifecycleManager>,
    pub broadcaster: ProgressBroadcaster,
    queue: Arc<dyn MessageQueue>,
    config: ServiceConfig,
}

impl Hub {
    pub fn new(
        central: Arc<dyn GraphStore>,
        queue: Arc<dyn MessageQueue>,
        sources: Arc<dyn SourceGraphOpener>,
        registry: Arc<TypeRegistry>,
        config: ServiceConfig,
    ) -> Self {
        let ids = Arc::new(IdGenerator::new());
        let broadcaster = ProgressBroadcaster::new(config.event_bus_capacity);
        let repository = AnalysisRepository::new(registry, Arc::clone(&ids));
        let merger = GraphMerger::new(broadcaster.clone(), repository.clone());
        let gateway = SubmissionGateway::new(Arc::clone(&queue), ids, config.clone());

        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&central),
            sources,
            repository.clone(),
            merger,
            broadcaster.clone(),
            gateway.clone(),
        ));
        let service = AnalysisService::new(
            central,
            repository,
            gateway,
            Arc::clone(&lifecycle),
            broadcaster.clone(),
            config.clone(),
        );

        Self {
            service,
            lifecycle,
            broadcaster,
            queue,
            config,
        }
    }

    /// A supervisor for the status consumer, configured from the service config.
    pub fn supervisor(&self) -> Supervisor {
        let consumer = StatusConsumer::new(Arc::clone(&self.queue), Arc::clone(&self.lifecycle));
        Supervisor::new(consumer)
            .with_restart_delay(self.config.restart_delay())
            .with_max_restarts(self.config.consumer_max_restarts)
    }
}
