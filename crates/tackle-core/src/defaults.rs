//! Centralized default constants.
//!
//! Values here are shared between crates; each crate's config types fall back
//! to these when the corresponding environment variable is absent.

// =============================================================================
// GRAPH PROPERTY KEYS
// =============================================================================

/// Property carrying the type tag(s) of a graph element.
///
/// Multi-valued on vertices; on edges the tags are joined with
/// [`EDGE_TYPE_DELIMITER`] because edge properties are single-valued.
pub const TYPE_PROP: &str = "w:winduptype";

/// Delimiter joining multiple type tags into one edge property value.
pub const EDGE_TYPE_DELIMITER: char = '|';

/// Property stamping every imported element with its owning analysis id.
pub const ISOLATION_TAG_PROP: &str = "analysisId";

// =============================================================================
// MERGE
// =============================================================================

/// A progress event is emitted each time this many elements have been imported.
pub const MERGE_PROGRESS_INTERVAL: u64 = 1000;

/// Task text reported while merging a run's graph into the central graph.
pub const MERGE_TASK: &str = "Merging analysis graph into central graph";

/// Relative location of the serialized result graph inside a run's output path.
pub const SOURCE_GRAPH_FILE: &str = "graph/graph.json";

// =============================================================================
// EVENTS
// =============================================================================

/// Capacity of the progress broadcast channel.
///
/// A subscriber that falls further behind than this is dropped.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RUN SUBMISSION
// =============================================================================

/// Rules shipped with the analysis worker image.
pub const SYSTEM_RULES_PATH: &str = "/opt/mta-cli/rules";

/// Base directory shared with the analysis worker.
pub const SHARED_FOLDER_PATH: &str = "/opt/windup/shared";

// =============================================================================
// QUEUE / CONSUMER
// =============================================================================

/// Polling interval for database-backed queues when no message is waiting.
pub const QUEUE_POLL_INTERVAL_MS: u64 = 500;

/// Delay before the supervisor restarts an aborted consumer loop.
pub const CONSUMER_RESTART_DELAY_MS: u64 = 1000;
