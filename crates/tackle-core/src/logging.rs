//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across the hub.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Merge aborted, consumer loop broken, requires operator attention |
//! | WARN  | Recoverable issue: skipped edge, dropped subscriber, missing configuration |
//! | INFO  | Lifecycle events (merge start/end, state transitions, consumer start/stop) |
//! | DEBUG | Decision points, intermediate counts, config choices |
//! | TRACE | Per-element iteration during merge |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "jobs", "graph"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "merge", "lifecycle", "gateway", "pool", "queue"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "merge", "delete_subgraph", "submit", "cancel"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Owning analysis id (also the isolation tag value).
pub const ANALYSIS_ID: &str = "analysis_id";

/// Run (execution) id.
pub const RUN_ID: &str = "run_id";

/// Execution state reported by the worker.
pub const STATE: &str = "state";

/// Queue destination name.
pub const DESTINATION: &str = "destination";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of vertices imported or counted.
pub const VERTEX_COUNT: &str = "vertex_count";

/// Number of edges imported or counted.
pub const EDGE_COUNT: &str = "edge_count";

/// Number of edges skipped because an endpoint was not imported.
pub const SKIPPED_EDGES: &str = "skipped_edges";

/// Number of live progress subscribers.
pub const SUBSCRIBER_COUNT: &str = "subscriber_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
