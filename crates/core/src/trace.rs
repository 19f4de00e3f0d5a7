// crates/core/src/trace.rs
//! Wire model for a task-execution trace snapshot.
//!
//! A snapshot is everything the orchestration backend returns for one trace
//! id: the list of completed (or currently running/errored) execution
//! records plus the end-of-run pending-task stack. Records are immutable
//! once decoded; a refetch produces a new snapshot, never an in-place
//! mutation.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::DecodeError;
use crate::output::{classify_output, ExecutionOutput};

/// Status of a task execution or one of its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

/// One completed LLM call made during a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct LlmCallRecord {
    /// Model identifier as reported by the engine.
    pub model: String,
    /// RFC 3339 timestamp of the request.
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// What the call was for ("resolve_document", "extract_fields", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Reference to the task created by a task-creation phase.
///
/// Used as a fallback join key when the execution record itself carries no
/// explicit task identifier (see [`TaskExecutionRecord::effective_task_id`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct CreatedTaskRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

/// One sub-phase of an execution (resolution, creation, execution,
/// context-update or generation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub status: TaskStatus,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// LLM calls issued while this phase ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub llm_calls: Vec<LlmCallRecord>,
    /// Only populated on the creation phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_task: Option<CreatedTaskRef>,
    /// Raw output value; only populated on the execution phase. Classified
    /// once at the ingestion boundary via [`crate::output::classify_output`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl PhaseRecord {
    /// Classify the raw output value once, at the ingestion boundary.
    pub fn classified_output(&self) -> ExecutionOutput {
        classify_output(self.output.as_ref())
    }
}

/// The structured phases map of an execution record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct TaskPhases {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_update: Option<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<PhaseRecord>,
}

/// An entry of a raw pending-task stack snapshot, as the engine recorded it
/// (bottom of stack first, i.e. next-to-execute last).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct RawStackEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Explicit currently-executing marker. Older engine versions omit it;
    /// see [`crate::pending::derive_pending_tasks`] for the fallback rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executing: Option<bool>,
}

/// One completed (or currently running/errored) step of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionRecord {
    /// Unique execution identifier.
    pub execution_id: String,
    /// Logical task identifier; may differ from the execution id and may be
    /// absent on older traces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    pub status: TaskStatus,
    /// RFC 3339; treated as optionally parseable (see the hierarchy
    /// builder's ordering rule).
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<TaskPhases>,
    /// The pending stack as observed just before this execution started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_before: Vec<RawStackEntry>,
}

impl TaskExecutionRecord {
    fn created_task(&self) -> Option<&CreatedTaskRef> {
        self.phases.as_ref()?.creation.as_ref()?.created_task.as_ref()
    }

    /// Resolve the stable join key for this execution.
    ///
    /// Precedence: explicit task id, then the id of the task created by the
    /// creation phase, then the execution id itself. Upstream data is
    /// inconsistent across engine versions; the fallback chain guarantees
    /// every record joins somewhere.
    pub fn effective_task_id(&self) -> String {
        self.task_id
            .clone()
            .or_else(|| self.created_task().and_then(|c| c.task_id.clone()))
            .unwrap_or_else(|| self.execution_id.clone())
    }

    /// Resolve the parent join key: explicit parent id wins over the parent
    /// embedded in the creation-phase data.
    pub fn effective_parent_id(&self) -> Option<String> {
        self.parent_task_id
            .clone()
            .or_else(|| self.created_task().and_then(|c| c.parent_task_id.clone()))
    }
}

/// Everything the backend returns for one trace id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct TraceSnapshot {
    pub trace_id: String,
    #[serde(default)]
    pub executions: Vec<TaskExecutionRecord>,
    /// End-of-run pending-task stack snapshot; empty while the run is live.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub final_stack: Vec<RawStackEntry>,
}

/// Decode a trace snapshot from its JSON wire form.
pub fn decode_snapshot(trace_id: &str, body: &str) -> Result<TraceSnapshot, DecodeError> {
    serde_json::from_str(body).map_err(|e| DecodeError::Snapshot {
        trace_id: trace_id.to_string(),
        message: e.to_string(),
    })
}
