// crates/core/src/hierarchy.rs
//! Merge of executed and pending tasks into a rooted forest.
//!
//! The builder is pure: no I/O, no internal state, deterministic output for
//! a given pair of inputs. Callers memoize externally if they need to.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::DateTime;
use serde::Serialize;
use ts_rs::TS;

use crate::pending::PendingTask;
use crate::trace::{TaskExecutionRecord, TaskPhases, TaskStatus};

/// A node of the merged task forest, ready for indented rendering.
///
/// Executed tasks carry their execution id and phases through; pending tasks
/// get execution-like defaults (status running, no end time, no phases) so
/// both satisfy the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    /// Effective task identifier: the join key, synthetic for pending tasks.
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub status: TaskStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phases: Option<TaskPhases>,
    pub is_pending: bool,
    pub is_executing: bool,
    /// Indentation depth: 0 for roots, parent + 1 below.
    pub level: u32,
    pub children: Vec<TaskNode>,
}

fn executed_node(record: &TaskExecutionRecord) -> TaskNode {
    TaskNode {
        task_id: record.effective_task_id(),
        execution_id: Some(record.execution_id.clone()),
        description: record.description.clone(),
        short_name: record.short_name.clone(),
        parent_task_id: record.effective_parent_id(),
        status: record.status,
        started_at: record.started_at.clone(),
        ended_at: record.ended_at.clone(),
        phases: record.phases.clone(),
        is_pending: false,
        is_executing: false,
        level: 0,
        children: Vec::new(),
    }
}

fn pending_node(task: &PendingTask) -> TaskNode {
    TaskNode {
        task_id: task.id.clone(),
        execution_id: None,
        description: task.description.clone(),
        short_name: task.short_name.clone(),
        parent_task_id: task.parent_task_id.clone(),
        status: TaskStatus::Running,
        started_at: String::new(),
        ended_at: None,
        phases: None,
        is_pending: true,
        is_executing: task.is_executing,
        level: 0,
        children: Vec::new(),
    }
}

/// Compare two optionally-parseable RFC 3339 instants.
///
/// An unparsable instant sorts after every parsable one; two unparsable
/// instants compare equal, so a stable sort keeps their input order.
fn compare_start_instants(a: &str, b: &str) -> Ordering {
    let parsed_a = DateTime::parse_from_rfc3339(a).ok();
    let parsed_b = DateTime::parse_from_rfc3339(b).ok();
    match (parsed_a, parsed_b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sibling ordering: executed before pending, executed by ascending start
/// instant, pending in input (stack-derived) order.
fn sibling_order(a: &TaskNode, b: &TaskNode) -> Ordering {
    match (a.is_pending, b.is_pending) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_start_instants(&a.started_at, &b.started_at),
    }
}

/// Merge executed records and pending descriptors into an ordered forest.
///
/// Parent slots are resolved by matching `parent_task_id` against effective
/// task identifiers; a task whose parent is unknown (or is itself) is
/// promoted to a root rather than dropped. A pending descriptor whose id
/// collides with an already-inserted node is skipped in favor of the
/// executed node. Each node joins exactly one children list, so assembly
/// cannot recurse forever even on malformed parent links; nodes trapped in
/// a parent cycle are unreachable from any root and are dropped.
pub fn build_task_hierarchy(
    executed: &[TaskExecutionRecord],
    pending: &[PendingTask],
) -> Vec<TaskNode> {
    let mut slots: Vec<Option<TaskNode>> = Vec::with_capacity(executed.len() + pending.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(slots.capacity());

    for record in executed {
        let node = executed_node(record);
        match index.entry(node.task_id.clone()) {
            // Duplicate effective id: the later record replaces the earlier.
            Entry::Occupied(entry) => slots[*entry.get()] = Some(node),
            Entry::Vacant(entry) => {
                entry.insert(slots.len());
                slots.push(Some(node));
            }
        }
    }
    for task in pending {
        if !index.contains_key(&task.id) {
            index.insert(task.id.clone(), slots.len());
            slots.push(Some(pending_node(task)));
        }
    }

    // Attach every slot to its parent's children list, or to the root list.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
    let mut roots: Vec<usize> = Vec::new();
    for slot in 0..slots.len() {
        let parent = slots[slot]
            .as_ref()
            .and_then(|node| node.parent_task_id.as_ref())
            .and_then(|id| index.get(id))
            .copied()
            .filter(|&parent_slot| parent_slot != slot);
        match parent {
            Some(parent_slot) => children[parent_slot].push(slot),
            None => roots.push(slot),
        }
    }

    sort_siblings(&mut roots, &slots);
    roots
        .into_iter()
        .filter_map(|slot| assemble(slot, 0, &mut slots, &children))
        .collect()
}

fn sort_siblings(siblings: &mut [usize], slots: &[Option<TaskNode>]) {
    siblings.sort_by(|&a, &b| match (slots[a].as_ref(), slots[b].as_ref()) {
        (Some(x), Some(y)) => sibling_order(x, y),
        _ => Ordering::Equal,
    });
}

fn assemble(
    slot: usize,
    level: u32,
    slots: &mut Vec<Option<TaskNode>>,
    children: &[Vec<usize>],
) -> Option<TaskNode> {
    let mut node = slots[slot].take()?;
    node.level = level;
    let mut child_slots = children[slot].clone();
    sort_siblings(&mut child_slots, slots);
    for child in child_slots {
        if let Some(child_node) = assemble(child, level + 1, slots, children) {
            node.children.push(child_node);
        }
    }
    Some(node)
}
