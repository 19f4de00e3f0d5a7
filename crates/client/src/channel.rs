// crates/client/src/channel.rs
//! Live update channel: a reconnecting subscription to one trace's update
//! stream.
//!
//! The channel owns a single background task per subscription, driven by a
//! `select!` over the transport stream, a heartbeat staleness check, and a
//! cancellation token. Transient transport failures are absorbed by a
//! bounded reconnect loop; consumers observe the channel only through the
//! registered callbacks and never need to wrap calls in error handling.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::sse::{StreamTransport, TransportEvent};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Payload tag that marks a keep-alive message.
const HEARTBEAT_TYPE: &str = "heartbeat";

/// Connection state derived from transport progress.
///
/// Distinct from the higher-level connected flag: during reconnect windows
/// the two can transiently disagree (the flag stays where the last
/// user-visible transition left it while the transport churns underneath).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
    Error = 3,
}

/// Reconnect and staleness tuning.
#[derive(Debug, Clone, Copy)]
pub struct ChannelTuning {
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Cadence of the staleness check; silence beyond twice this value is
    /// reported as a heartbeat timeout.
    pub heartbeat_interval: Duration,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// A non-heartbeat payload, forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct WirePayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

pub type MessageHandler = Arc<dyn Fn(UpdateEvent) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ChannelError) + Send + Sync>;
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;
pub type ConnectionChangeHandler = Arc<dyn Fn(bool, Option<&str>) + Send + Sync>;

/// The active handler set. Replaced wholesale via
/// [`UpdateChannel::update_options`]; last writer wins.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    pub on_message: Option<MessageHandler>,
    pub on_error: Option<ErrorHandler>,
    pub on_open: Option<LifecycleHandler>,
    pub on_close: Option<LifecycleHandler>,
    pub on_connection_change: Option<ConnectionChangeHandler>,
}

/// Partial option replacement: each populated field replaces its whole
/// counterpart without interrupting an active connection.
#[derive(Default)]
pub struct ChannelOptions {
    pub handlers: Option<ChannelHandlers>,
    pub tuning: Option<ChannelTuning>,
}

struct ChannelShared {
    transport: Arc<dyn StreamTransport>,
    handlers: RwLock<ChannelHandlers>,
    tuning: RwLock<ChannelTuning>,
    state: AtomicU8,
    connected: AtomicBool,
    attempts: AtomicU32,
}

impl ChannelShared {
    fn handlers(&self) -> ChannelHandlers {
        match self.handlers.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("handlers lock poisoned: {e}");
                ChannelHandlers::default()
            }
        }
    }

    fn tuning(&self) -> ChannelTuning {
        match self.tuning.read() {
            Ok(guard) => *guard,
            Err(e) => {
                tracing::error!("tuning lock poisoned: {e}");
                ChannelTuning::default()
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            3 => ConnectionState::Error,
            _ => ConnectionState::Closed,
        }
    }

    /// Flip the connected flag; fires `on_connection_change` only on actual
    /// transitions, so silent reconnect cycles don't spam the consumer.
    fn set_connected(&self, now: bool, reason: Option<&str>) {
        let was = self.connected.swap(now, Ordering::SeqCst);
        if was != now {
            if let Some(handler) = self.handlers().on_connection_change {
                handler(now, reason);
            }
        }
    }

    fn fire_error(&self, err: &ChannelError) {
        if let Some(handler) = self.handlers().on_error {
            handler(err);
        }
    }

    fn fire_open(&self) {
        if let Some(handler) = self.handlers().on_open {
            handler();
        }
    }

    fn fire_close(&self) {
        if let Some(handler) = self.handlers().on_close {
            handler();
        }
    }

    fn fire_message(&self, event: UpdateEvent) {
        if let Some(handler) = self.handlers().on_message {
            handler(event);
        }
    }
}

struct Subscription {
    trace_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Reconnecting push-style subscription to a single trace's update stream.
///
/// One subscription is active at a time; starting a new one (same or
/// different trace) tears the previous one down synchronously first. The
/// channel is explicitly constructed and passed by reference to whatever
/// coordination layer needs it; there is no global instance.
pub struct UpdateChannel {
    shared: Arc<ChannelShared>,
    active: Mutex<Option<Subscription>>,
}

impl UpdateChannel {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                transport,
                handlers: RwLock::new(ChannelHandlers::default()),
                tuning: RwLock::new(ChannelTuning::default()),
                state: AtomicU8::new(ConnectionState::Closed as u8),
                connected: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
            active: Mutex::new(None),
        }
    }

    /// Begin a subscription for `trace_id`.
    ///
    /// Fails synchronously on an empty id, with no side effects and no
    /// transport constructed. Must be called from within a tokio runtime.
    pub fn start_monitoring(&self, trace_id: &str) -> Result<(), ChannelError> {
        if trace_id.is_empty() {
            return Err(ChannelError::EmptyTraceId);
        }

        self.stop_monitoring();
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.shared),
            trace_id.to_string(),
            cancel.clone(),
        ));

        match self.active.lock() {
            Ok(mut guard) => {
                *guard = Some(Subscription {
                    trace_id: trace_id.to_string(),
                    cancel,
                    task,
                });
            }
            Err(e) => tracing::error!("subscription lock poisoned: {e}"),
        }
        Ok(())
    }

    /// Tear down any active subscription. Idempotent, callable from any
    /// state; cancels the pending reconnect timer and the staleness check.
    pub fn stop_monitoring(&self) {
        let previous = match self.active.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                tracing::error!("subscription lock poisoned: {e}");
                None
            }
        };
        if let Some(subscription) = previous {
            debug!(trace_id = %subscription.trace_id, "stopping trace monitoring");
            subscription.cancel.cancel();
            subscription.task.abort();
            self.shared.set_state(ConnectionState::Closed);
            self.shared.set_connected(false, None);
            self.shared.fire_close();
        }
    }

    /// Replace the callback set and/or reconnect tuning. Does not interrupt
    /// an active connection; tuning is read at its next point of use.
    pub fn update_options(&self, options: ChannelOptions) {
        if let Some(handlers) = options.handlers {
            match self.shared.handlers.write() {
                Ok(mut guard) => *guard = handlers,
                Err(e) => tracing::error!("handlers lock poisoned: {e}"),
            }
        }
        if let Some(tuning) = options.tuning {
            match self.shared.tuning.write() {
                Ok(mut guard) => *guard = tuning,
                Err(e) => tracing::error!("tuning lock poisoned: {e}"),
            }
        }
    }

    /// Transport-level readiness.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Higher-level connected flag, as last reported to the consumer.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The id currently being monitored, if any.
    pub fn monitored_trace(&self) -> Option<String> {
        match self.active.lock() {
            Ok(guard) => guard.as_ref().map(|s| s.trace_id.clone()),
            Err(_) => None,
        }
    }
}

impl Drop for UpdateChannel {
    fn drop(&mut self) {
        // Silent teardown: no callbacks once the owner is gone.
        if let Ok(mut guard) = self.active.lock() {
            if let Some(subscription) = guard.take() {
                subscription.cancel.cancel();
                subscription.task.abort();
            }
        }
    }
}

enum StreamOutcome {
    /// The cancellation token fired; teardown is handled by the caller.
    Stopped,
    Failed(String),
}

async fn run_subscription(
    shared: Arc<ChannelShared>,
    trace_id: String,
    cancel: CancellationToken,
) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        let stream = match shared.transport.connect(&trace_id) {
            Ok(stream) => stream,
            Err(e) => {
                // A constructor failure is a configuration error; retrying
                // cannot fix it and no reconnect attempt is consumed.
                shared.set_state(ConnectionState::Error);
                shared.fire_error(&ChannelError::TransportCreate {
                    message: e.to_string(),
                });
                return;
            }
        };

        match drive_stream(&shared, stream, &cancel).await {
            StreamOutcome::Stopped => return,
            StreamOutcome::Failed(reason) => {
                shared.set_state(ConnectionState::Error);
                let tuning = shared.tuning();
                let attempts = shared.attempts.load(Ordering::SeqCst);
                if attempts >= tuning.max_reconnect_attempts {
                    warn!(trace_id = %trace_id, attempts, %reason, "reconnect attempts exhausted");
                    shared.fire_error(&ChannelError::ReconnectExhausted { attempts });
                    shared.set_connected(false, Some("reconnect attempts exhausted"));
                    return;
                }
                shared.attempts.fetch_add(1, Ordering::SeqCst);
                debug!(
                    trace_id = %trace_id,
                    attempt = attempts + 1,
                    max = tuning.max_reconnect_attempts,
                    %reason,
                    "stream failed, scheduling reconnect"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(tuning.reconnect_interval) => {}
                }
            }
        }
    }
}

async fn drive_stream(
    shared: &ChannelShared,
    mut stream: crate::sse::EventStream,
    cancel: &CancellationToken,
) -> StreamOutcome {
    use futures_util::StreamExt;

    let heartbeat_interval = shared.tuning().heartbeat_interval;
    let mut staleness_check = tokio::time::interval(heartbeat_interval);
    staleness_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_message = tokio::time::Instant::now();
    let mut stale_reported = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Stopped,

            event = stream.next() => match event {
                Some(TransportEvent::Opened) => {
                    shared.attempts.store(0, Ordering::SeqCst);
                    shared.set_state(ConnectionState::Open);
                    last_message = tokio::time::Instant::now();
                    stale_reported = false;
                    shared.fire_open();
                    shared.set_connected(true, None);
                }
                Some(TransportEvent::Message(text)) => {
                    last_message = tokio::time::Instant::now();
                    if stale_reported {
                        // Traffic resumed after a stale window.
                        stale_reported = false;
                        shared.set_connected(true, None);
                    }
                    match serde_json::from_str::<WirePayload>(&text) {
                        Ok(payload) if payload.event_type == HEARTBEAT_TYPE => {}
                        Ok(payload) => shared.fire_message(UpdateEvent {
                            event_type: payload.event_type,
                            data: payload.data,
                        }),
                        Err(e) => shared.fire_error(&ChannelError::Parse {
                            message: e.to_string(),
                        }),
                    }
                }
                Some(TransportEvent::Failed(reason)) => return StreamOutcome::Failed(reason),
                None => return StreamOutcome::Failed("stream ended".to_string()),
            },

            _ = staleness_check.tick() => {
                let silent_for = last_message.elapsed();
                if shared.state() == ConnectionState::Open
                    && !stale_reported
                    && silent_for > heartbeat_interval * 2
                {
                    // Advisory only: the transport's own error event is the
                    // authoritative close trigger.
                    stale_reported = true;
                    shared.fire_error(&ChannelError::HeartbeatTimeout { silent_for });
                    shared.set_connected(false, Some("heartbeat timeout"));
                }
            }
        }
    }
}
