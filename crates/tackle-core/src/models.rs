//! Domain models and wire messages for the tackle analysis hub.
//!
//! Records persisted in the central graph ([`Analysis`], [`Run`],
//! [`Configuration`]) plus the JSON messages exchanged with the external
//! analysis worker and with live progress subscribers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::graph::ElementId;

// =============================================================================
// TIME HELPERS
// =============================================================================

/// Timestamps are persisted as epoch milliseconds.
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert persisted epoch milliseconds back to a timestamp.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

// =============================================================================
// STATUS ENUMS
// =============================================================================

/// Lifecycle status of an owning entity ("analysis").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    #[default]
    Init,
    Started,
    Merging,
    Cancelled,
    Completed,
    Deleted,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Init => "INIT",
            AnalysisStatus::Started => "STARTED",
            AnalysisStatus::Merging => "MERGING",
            AnalysisStatus::Cancelled => "CANCELLED",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Deleted => "DELETED",
        }
    }

    /// Terminal statuses accept no further worker-driven transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Cancelled | AnalysisStatus::Deleted
        )
    }

    /// Status an analysis takes when a client deletes it.
    ///
    /// A finished analysis is truly deleted, one already cancelled or deleted
    /// keeps its status, and anything else is cancelled.
    pub fn next_on_delete(&self) -> AnalysisStatus {
        match self {
            AnalysisStatus::Completed => AnalysisStatus::Deleted,
            AnalysisStatus::Cancelled | AnalysisStatus::Deleted => *self,
            _ => AnalysisStatus::Cancelled,
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INIT" => Ok(AnalysisStatus::Init),
            "STARTED" => Ok(AnalysisStatus::Started),
            "MERGING" => Ok(AnalysisStatus::Merging),
            "CANCELLED" => Ok(AnalysisStatus::Cancelled),
            "COMPLETED" => Ok(AnalysisStatus::Completed),
            "DELETED" => Ok(AnalysisStatus::Deleted),
            other => Err(Error::InvalidInput(format!(
                "Unknown analysis status: {}",
                other
            ))),
        }
    }
}

/// Execution state of a run, in the worker's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    #[default]
    Queued,
    Started,
    Completed,
    Cancelled,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Queued => "QUEUED",
            ExecutionState::Started => "STARTED",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Cancelled => "CANCELLED",
            ExecutionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(ExecutionState::Queued),
            "STARTED" => Ok(ExecutionState::Started),
            "COMPLETED" => Ok(ExecutionState::Completed),
            "CANCELLED" => Ok(ExecutionState::Cancelled),
            "FAILED" => Ok(ExecutionState::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown execution state: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// PERSISTED RECORDS
// =============================================================================

/// The long-lived subject of repeated analysis runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: i64,
    pub status: AnalysisStatus,
    /// Most recent event body, kept verbatim for client replay.
    pub last_update: Option<JsonValue>,
    pub created: DateTime<Utc>,
    /// Owned runs, most-recent-first by queue time.
    pub runs: Vec<Run>,
}

impl Analysis {
    pub fn latest_run(&self) -> Option<&Run> {
        self.runs.first()
    }
}

/// Resolved analysis configuration imported from a run's result graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub packages: Vec<String>,
    pub source_mode: bool,
}

/// One execution attempt belonging to an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Graph vertex holding this record.
    #[serde(skip)]
    pub vertex_id: ElementId,
    pub id: i64,
    pub state: ExecutionState,
    pub time_queued: Option<DateTime<Utc>>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_finished: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub work_total: i64,
    pub work_completed: i64,
    pub current_task: Option<String>,
    pub output_path: String,
    pub application_file_name: Option<String>,
    /// Set once the result graph has been merged.
    pub total_effort: Option<i64>,
    pub issues_per_category: Option<BTreeMap<String, i64>>,
    pub configuration: Option<Configuration>,
}

/// An issue (inline hint) read back from the central graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: ElementId,
    /// Most specific kinds the stored element resolves to.
    pub kinds: Vec<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub rule_id: Option<String>,
    pub effort: i64,
    pub line_number: Option<i64>,
    pub category: Option<String>,
}

// =============================================================================
// SUBMISSION OPTIONS
// =============================================================================

/// Client-supplied options for a new run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(default)]
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub source_mode: bool,
}

impl RunOptions {
    /// Build options from comma-separated form values.
    pub fn from_csv(
        sources: Option<&str>,
        targets: &str,
        packages: Option<&str>,
        source_mode: bool,
    ) -> Result<Self> {
        let options = Self {
            sources: split_csv(sources.unwrap_or_default()),
            targets: split_csv(targets),
            packages: split_csv(packages.unwrap_or_default()),
            source_mode,
        };
        options.validate()?;
        Ok(options)
    }

    /// At least one target technology is required.
    pub fn validate(&self) -> Result<()> {
        if self.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(Error::InvalidInput(
                "At least one target technology is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// =============================================================================
// WORKER MESSAGES
// =============================================================================

/// Inbound status message from the analysis worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Run id.
    pub id: i64,
    pub state: ExecutionState,
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub work_completed: i64,
    #[serde(default, alias = "totalWork")]
    pub work_total: i64,
    #[serde(default)]
    pub time_queued: Option<i64>,
    #[serde(default)]
    pub time_started: Option<i64>,
    /// Present on COMPLETED.
    #[serde(default)]
    pub output_path: Option<String>,
    /// Present on COMPLETED.
    #[serde(default)]
    pub time_completed: Option<i64>,
}

impl StatusUpdate {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Key/value analysis option understood by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedOption {
    pub name: String,
    pub value: String,
}

impl AdvancedOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RulesPathType {
    SystemProvided,
    UserProvided,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesPath {
    pub path: String,
    pub scan_recursively: bool,
    pub rules_path_type: RulesPathType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredApplication {
    pub input_path: String,
}

/// Analysis settings carried by a [`RunRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    pub advanced_options: Vec<AdvancedOption>,
    pub include_packages: Vec<Package>,
    pub rules_paths: Vec<RulesPath>,
    pub applications: Vec<RegisteredApplication>,
}

impl AnalysisContext {
    /// Value of the first advanced option with the given name.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.advanced_options
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.value.as_str())
    }
}

/// Outbound run request handed to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub id: i64,
    pub analysis_context: AnalysisContext,
    /// Epoch milliseconds.
    pub time_queued: i64,
    pub state: ExecutionState,
    pub output_path: String,
    #[serde(default)]
    pub application_file_name: Option<String>,
}

/// Outbound cancellation request, addressed by run id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub id: i64,
}

// =============================================================================
// PROGRESS EVENTS
// =============================================================================

/// Milestone event relayed to live progress subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Owning analysis id.
    pub id: i64,
    pub state: String,
    pub current_task: String,
    pub total_work: i64,
    pub work_completed: i64,
}

impl ProgressEvent {
    pub fn new(
        id: i64,
        state: impl Into<String>,
        current_task: impl Into<String>,
        total_work: i64,
        work_completed: i64,
    ) -> Self {
        Self {
            id,
            state: state.into(),
            current_task: current_task.into(),
            total_work,
            work_completed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.work_completed >= self.total_work
    }
}

// =============================================================================
// QUEUE ADDRESSING
// =============================================================================

/// Named message destinations shared with the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    /// Run requests (queue).
    ExecutorQueue,
    /// Worker status updates (queue).
    StatusUpdateQueue,
    /// Cancellation requests (topic).
    ExecutorCancellation,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::ExecutorQueue,
        Destination::StatusUpdateQueue,
        Destination::ExecutorCancellation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::ExecutorQueue => "executorQueue",
            Destination::StatusUpdateQueue => "statusUpdateQueue",
            Destination::ExecutorCancellation => "executorCancellation",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Destination::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown destination: {}", s)))
    }
}

/// Message-level attributes used for addressing without parsing the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttributes {
    /// Owning analysis id (the worker's "project" id).
    #[serde(rename = "projectId")]
    pub analysis_id: i64,
    /// Run id (the worker's "execution" id).
    #[serde(rename = "executionId")]
    pub run_id: i64,
}

/// A message travelling over a [`Destination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub attributes: MessageAttributes,
}

impl QueueMessage {
    pub fn new(body: impl Into<String>, analysis_id: i64, run_id: i64) -> Self {
        Self {
            body: body.into(),
            attributes: MessageAttributes {
                analysis_id,
                run_id,
            },
        }
    }

    /// Serialize a payload into a message body.
    pub fn json<T: Serialize>(payload: &T, analysis_id: i64, run_id: i64) -> Result<Self> {
        Ok(Self::new(serde_json::to_string(payload)?, analysis_id, run_id))
    }
}
