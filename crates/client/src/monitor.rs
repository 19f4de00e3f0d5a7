// crates/client/src/monitor.rs
//! Page-level coordination: wires live update events to snapshot refetches
//! and hierarchy rebuilds.
//!
//! The monitor follows "refresh now, see whatever is current" semantics: an
//! update notification only signals that fresh data exists, so a burst of
//! notifications collapses into one in-flight fetch plus at most one queued
//! behind it. Consumers watch the published [`TraceView`]; a failed refresh
//! leaves the last good view in place.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use runview_core::{build_task_hierarchy, derive_pending_tasks, TaskNode, TraceSnapshot};

use crate::channel::{ChannelHandlers, ChannelOptions, UpdateChannel};
use crate::error::MonitorError;
use crate::fetch::TraceFetcher;
use crate::sse::StreamTransport;

/// The rendered view of one trace: the merged task forest plus counts.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceView {
    pub trace_id: String,
    pub roots: Vec<TaskNode>,
    pub executed_count: usize,
    pub pending_count: usize,
}

impl TraceView {
    /// Derive pending tasks and build the hierarchy from a fresh snapshot.
    pub fn from_snapshot(snapshot: &TraceSnapshot) -> Self {
        let pending = derive_pending_tasks(snapshot);
        let roots = build_task_hierarchy(&snapshot.executions, &pending);
        Self {
            trace_id: snapshot.trace_id.clone(),
            roots,
            executed_count: snapshot.executions.len(),
            pending_count: pending.len(),
        }
    }
}

/// Owns an [`UpdateChannel`] plus a refetch worker for one trace at a time.
pub struct TraceMonitor {
    fetcher: Arc<dyn TraceFetcher>,
    channel: UpdateChannel,
    view_tx: watch::Sender<Option<TraceView>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TraceMonitor {
    pub fn new(fetcher: Arc<dyn TraceFetcher>, transport: Arc<dyn StreamTransport>) -> Self {
        let (view_tx, _) = watch::channel(None);
        Self {
            fetcher,
            channel: UpdateChannel::new(transport),
            view_tx,
            worker: Mutex::new(None),
        }
    }

    /// Fetch the initial snapshot, publish its view, then start live
    /// monitoring. Replaces any previous subscription.
    pub async fn start(&self, trace_id: &str) -> Result<(), MonitorError> {
        self.stop();

        let snapshot = self.fetcher.fetch_trace(trace_id).await?;
        self.view_tx
            .send_replace(Some(TraceView::from_snapshot(&snapshot)));

        // Single-slot refresh queue: one fetch in flight, at most one queued.
        let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);
        let fetcher = Arc::clone(&self.fetcher);
        let view_tx = self.view_tx.clone();
        let id = trace_id.to_string();
        let worker = tokio::spawn(async move {
            while refresh_rx.recv().await.is_some() {
                match fetcher.fetch_trace(&id).await {
                    Ok(snapshot) => {
                        debug!(trace_id = %id, executions = snapshot.executions.len(), "trace refreshed");
                        view_tx.send_replace(Some(TraceView::from_snapshot(&snapshot)));
                    }
                    Err(e) => {
                        warn!(trace_id = %id, error = %e, "trace refresh failed, keeping last view");
                    }
                }
            }
        });
        match self.worker.lock() {
            Ok(mut guard) => *guard = Some(worker),
            Err(e) => tracing::error!("worker lock poisoned: {e}"),
        }

        self.channel.update_options(ChannelOptions {
            handlers: Some(ChannelHandlers {
                on_message: Some(Arc::new(move |_event| {
                    // A full queue already has a refresh pending.
                    let _ = refresh_tx.try_send(());
                })),
                on_error: Some(Arc::new(|err| {
                    warn!(error = %err, "live update channel error");
                })),
                on_connection_change: Some(Arc::new(|connected, reason| {
                    debug!(connected, reason, "live update connection changed");
                })),
                ..ChannelHandlers::default()
            }),
            tuning: None,
        });
        self.channel.start_monitoring(trace_id)?;
        Ok(())
    }

    /// Stop live monitoring and the refetch worker. The last published view
    /// stays available to watchers.
    pub fn stop(&self) {
        self.channel.stop_monitoring();
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            worker.abort();
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TraceView>> {
        self.view_tx.subscribe()
    }

    pub fn channel(&self) -> &UpdateChannel {
        &self.channel
    }
}

impl Drop for TraceMonitor {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(worker) = guard.take() {
                worker.abort();
            }
        }
    }
}
