//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use tackle_core::defaults::{
    CONSUMER_RESTART_DELAY_MS, EVENT_BUS_CAPACITY, QUEUE_POLL_INTERVAL_MS, SHARED_FOLDER_PATH,
    SYSTEM_RULES_PATH,
};

/// Configuration for the analysis service and its consumers.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base directory shared with the analysis worker; run output lives under it.
    pub shared_folder_path: PathBuf,
    /// Rules shipped with the worker.
    pub system_rules_path: String,
    /// Capacity of the progress broadcast channel.
    pub event_bus_capacity: usize,
    /// Delay before a broken consumer loop is restarted.
    pub consumer_restart_delay_ms: u64,
    /// Restart budget; `None` restarts forever.
    pub consumer_max_restarts: Option<u32>,
    /// Polling interval for database-backed queues.
    pub queue_poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shared_folder_path: PathBuf::from(SHARED_FOLDER_PATH),
            system_rules_path: SYSTEM_RULES_PATH.to_string(),
            event_bus_capacity: EVENT_BUS_CAPACITY,
            consumer_restart_delay_ms: CONSUMER_RESTART_DELAY_MS,
            consumer_max_restarts: None,
            queue_poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SHARED_FOLDER_PATH` | `/opt/windup/shared` | Base output directory |
    /// | `SYSTEM_RULES_PATH` | `/opt/mta-cli/rules` | Worker rule set |
    /// | `EVENT_BUS_CAPACITY` | `256` | Progress channel capacity |
    /// | `CONSUMER_RESTART_DELAY_MS` | `1000` | Delay before restarting a consumer |
    /// | `CONSUMER_MAX_RESTARTS` | unlimited | Restart budget |
    /// | `QUEUE_POLL_INTERVAL_MS` | `500` | Database queue polling interval |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let shared_folder_path = std::env::var("SHARED_FOLDER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.shared_folder_path);

        let system_rules_path =
            std::env::var("SYSTEM_RULES_PATH").unwrap_or(defaults.system_rules_path);

        let event_bus_capacity = env_parse("EVENT_BUS_CAPACITY")
            .unwrap_or(defaults.event_bus_capacity)
            .max(1);

        let consumer_restart_delay_ms =
            env_parse("CONSUMER_RESTART_DELAY_MS").unwrap_or(defaults.consumer_restart_delay_ms);

        let consumer_max_restarts = env_parse("CONSUMER_MAX_RESTARTS");

        let queue_poll_interval_ms =
            env_parse("QUEUE_POLL_INTERVAL_MS").unwrap_or(defaults.queue_poll_interval_ms);

        Self {
            shared_folder_path,
            system_rules_path,
            event_bus_capacity,
            consumer_restart_delay_ms,
            consumer_max_restarts,
            queue_poll_interval_ms,
        }
    }

    pub fn with_shared_folder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shared_folder_path = path.into();
        self
    }

    pub fn with_system_rules_path(mut self, path: impl Into<String>) -> Self {
        self.system_rules_path = path.into();
        self
    }

    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity.max(1);
        self
    }

    pub fn with_consumer_restart_delay(mut self, ms: u64) -> Self {
        self.consumer_restart_delay_ms = ms;
        self
    }

    pub fn with_consumer_max_restarts(mut self, max: Option<u32>) -> Self {
        self.consumer_max_restarts = max;
        self
    }

    pub fn with_queue_poll_interval(mut self, ms: u64) -> Self {
        self.queue_poll_interval_ms = ms;
        self
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.consumer_restart_delay_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    /// Output directory of an analysis' runs.
    pub fn output_path_for(&self, analysis_id: i64) -> PathBuf {
        self.shared_folder_path.join(analysis_id.to_string())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.shared_folder_path, PathBuf::from("/opt/windup/shared"));
        assert_eq!(config.system_rules_path, "/opt/mta-cli/rules");
        assert_eq!(config.event_bus_capacity, 256);
        assert_eq!(config.restart_delay(), Duration::from_millis(1000));
        assert!(config.consumer_max_restarts.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ServiceConfig::default()
            .with_shared_folder_path("/tmp/shared")
            .with_consumer_restart_delay(5)
            .with_consumer_max_restarts(Some(2))
            .with_event_bus_capacity(0);
        assert_eq!(config.output_path_for(42), PathBuf::from("/tmp/shared/42"));
        assert_eq!(config.restart_delay(), Duration::from_millis(5));
        assert_eq!(config.consumer_max_restarts, Some(2));
        assert_eq!(config.event_bus_capacity, 1);
    }
}
