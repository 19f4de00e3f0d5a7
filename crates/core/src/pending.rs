// crates/core/src/pending.rs
//! Derivation of pending-task descriptors from raw stack snapshots.
//!
//! A pending task is queued but not yet started. The engine never reports
//! them directly; they are inferred from the most recent pending-stack
//! snapshot on every render pass and never persisted.

use serde::Serialize;
use ts_rs::TS;

use crate::trace::{RawStackEntry, TraceSnapshot};

/// Prefix for synthetic pending-task identifiers. Keeps them namespaced away
/// from real execution identifiers so the hierarchy merge cannot collide.
const PENDING_ID_PREFIX: &str = "pending-";

/// A task queued but not yet started.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    /// Synthetic identifier: `pending-` + the raw entry id, or the entry's
    /// position when the engine assigned none.
    pub id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Whether this entry is the one the engine is executing right now.
    pub is_executing: bool,
}

/// Derive pending-task descriptors from the latest stack snapshot.
///
/// Snapshot selection: the trace's end-of-run stack when present, else the
/// `stack_before` of the most recent execution. The raw stack is recorded
/// next-to-execute **last**; the result is reversed so the next-to-execute
/// entry comes first.
///
/// Currently-executing contract: if any entry of the chosen snapshot carries
/// the explicit `executing` marker, those markers are authoritative for the
/// whole snapshot. Otherwise the first entry of the reversed snapshot is
/// considered executing.
pub fn derive_pending_tasks(snapshot: &TraceSnapshot) -> Vec<PendingTask> {
    let stack: &[RawStackEntry] = if !snapshot.final_stack.is_empty() {
        &snapshot.final_stack
    } else {
        snapshot
            .executions
            .last()
            .map(|e| e.stack_before.as_slice())
            .unwrap_or(&[])
    };

    let has_explicit_marker = stack.iter().any(|e| e.executing.is_some());

    stack
        .iter()
        .rev()
        .enumerate()
        .map(|(position, entry)| PendingTask {
            id: match &entry.id {
                Some(raw) => format!("{PENDING_ID_PREFIX}{raw}"),
                None => format!("{PENDING_ID_PREFIX}{position}"),
            },
            description: entry.description.clone(),
            short_name: entry.short_name.clone(),
            parent_task_id: entry.parent_task_id.clone(),
            is_executing: if has_explicit_marker {
                entry.executing.unwrap_or(false)
            } else {
                position == 0
            },
        })
        .collect()
}
