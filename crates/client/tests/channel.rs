//! Live update channel behavior against a scripted in-memory transport.
//!
//! All timing-sensitive tests run with a paused tokio clock, so sleeps and
//! reconnect/heartbeat timers resolve deterministically in virtual time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;

use runview_client::{
    ChannelHandlers, ChannelOptions, ChannelTuning, ConnectionState, EventStream, StreamTransport,
    TransportError, TransportEvent, UpdateChannel,
};

/// One step of a connection script.
#[derive(Clone)]
enum Step {
    Emit(TransportEvent),
    Wait(Duration),
}

/// Replays one script per `connect` call (the last script repeats for any
/// further connects), then pends forever so only scripted failures end a
/// stream.
struct ScriptedTransport {
    scripts: Mutex<Vec<Vec<Step>>>,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts),
            connects: AtomicUsize::new(0),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StreamTransport for ScriptedTransport {
    fn connect(&self, _trace_id: &str) -> Result<EventStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = {
            let mut guard = self.scripts.lock().unwrap();
            if guard.len() > 1 {
                guard.remove(0)
            } else {
                guard.first().cloned().unwrap_or_default()
            }
        };
        let stream = async_stream::stream! {
            for step in script {
                match step {
                    Step::Emit(event) => yield event,
                    Step::Wait(duration) => tokio::time::sleep(duration).await,
                }
            }
            futures_util::future::pending::<()>().await;
        };
        Ok(stream.boxed())
    }
}

/// Records every callback invocation for assertions.
#[derive(Default)]
struct Recorder {
    opens: AtomicUsize,
    closes: AtomicUsize,
    messages: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    connection_changes: Mutex<Vec<bool>>,
}

fn recording_handlers(recorder: &Arc<Recorder>) -> ChannelHandlers {
    ChannelHandlers {
        on_message: Some(Arc::new({
            let r = Arc::clone(recorder);
            move |event| r.messages.lock().unwrap().push(event.event_type)
        })),
        on_error: Some(Arc::new({
            let r = Arc::clone(recorder);
            move |err| r.errors.lock().unwrap().push(err.to_string())
        })),
        on_open: Some(Arc::new({
            let r = Arc::clone(recorder);
            move || {
                r.opens.fetch_add(1, Ordering::SeqCst);
            }
        })),
        on_close: Some(Arc::new({
            let r = Arc::clone(recorder);
            move || {
                r.closes.fetch_add(1, Ordering::SeqCst);
            }
        })),
        on_connection_change: Some(Arc::new({
            let r = Arc::clone(recorder);
            move |connected, _reason| r.connection_changes.lock().unwrap().push(connected)
        })),
    }
}

fn tuning(reconnect_secs: u64, max_attempts: u32, heartbeat_secs: u64) -> ChannelTuning {
    ChannelTuning {
        reconnect_interval: Duration::from_secs(reconnect_secs),
        max_reconnect_attempts: max_attempts,
        heartbeat_interval: Duration::from_secs(heartbeat_secs),
    }
}

fn failed(reason: &str) -> Step {
    Step::Emit(TransportEvent::Failed(reason.to_string()))
}

fn message(payload: &str) -> Step {
    Step::Emit(TransportEvent::Message(payload.to_string()))
}

#[tokio::test]
async fn test_empty_trace_id_rejected_synchronously() {
    let transport = ScriptedTransport::new(vec![]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: None,
    });

    assert!(channel.start_monitoring("").is_err());

    // No transport constructed, no callbacks fired.
    assert_eq!(transport.connects(), 0);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);
    assert!(recorder.errors.lock().unwrap().is_empty());
    assert_eq!(channel.connection_state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_fires_exactly_once() {
    let transport = ScriptedTransport::new(vec![vec![failed("connection refused")]]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: Some(tuning(1, 3, 30)),
    });

    channel.start_monitoring("tr-1").unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // Initial connect plus three reconnect attempts, then the channel goes
    // quiet until an explicit start_monitoring call.
    assert_eq!(transport.connects(), 4);
    let errors = recorder.errors.lock().unwrap();
    let exhausted = errors.iter().filter(|e| e.contains("exhausted")).count();
    assert_eq!(exhausted, 1);
    assert_eq!(channel.connection_state(), ConnectionState::Error);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect_cancels_pending_timer() {
    let transport = ScriptedTransport::new(vec![
        vec![failed("first connect fails")],
        vec![Step::Emit(TransportEvent::Opened)],
    ]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: Some(tuning(5, 5, 30)),
    });

    channel.start_monitoring("tr-1").unwrap();
    // Let the first connect fail and the reconnect timer get scheduled.
    tokio::time::sleep(Duration::from_millis(10)).await;
    channel.stop_monitoring();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // The second script would have opened; the cancel must prevent it.
    assert_eq!(transport.connects(), 1);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    assert_eq!(channel.connection_state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_fires_once_per_silence_window() {
    let transport = ScriptedTransport::new(vec![vec![
        Step::Emit(TransportEvent::Opened),
        Step::Wait(Duration::from_secs(10)),
        message(r#"{"type":"heartbeat"}"#),
    ]]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: Some(tuning(5, 5, 1)),
    });

    channel.start_monitoring("tr-1").unwrap();

    // Silence exceeds 2 x heartbeat_interval shortly after t=2s; exactly one
    // advisory fires for the window.
    tokio::time::sleep(Duration::from_secs(5)).await;
    {
        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors.iter().filter(|e| e.contains("stale")).count(), 1);
    }
    assert!(!channel.is_connected());
    // The transport stays open: staleness is advisory.
    assert_eq!(channel.connection_state(), ConnectionState::Open);

    // The heartbeat at t=10s resets the clock; the next silent window fires
    // one more advisory.
    tokio::time::sleep(Duration::from_secs(15)).await;
    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.iter().filter(|e| e.contains("stale")).count(), 2);
    // Heartbeat payloads never reach on_message.
    assert!(recorder.messages.lock().unwrap().is_empty());
    // Connected flag recovered on traffic, then dropped again.
    assert_eq!(
        *recorder.connection_changes.lock().unwrap(),
        vec![true, false, true, false]
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_swallowed_updates_forwarded_parse_errors_reported() {
    let transport = ScriptedTransport::new(vec![vec![
        Step::Emit(TransportEvent::Opened),
        message(r#"{"type":"heartbeat"}"#),
        message("{not json"),
        message(r#"{"type":"trace_updated","data":{"traceId":"tr-1"}}"#),
    ]]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: None,
    });

    channel.start_monitoring("tr-1").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        *recorder.messages.lock().unwrap(),
        vec!["trace_updated".to_string()]
    );
    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.iter().filter(|e| e.contains("malformed")).count(), 1);
    // A parse failure advances no reconnect state.
    assert_eq!(transport.connects(), 1);
    assert_eq!(channel.connection_state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_attempt_counter() {
    let transport = ScriptedTransport::new(vec![
        vec![failed("boom")],
        vec![
            Step::Emit(TransportEvent::Opened),
            Step::Wait(Duration::from_secs(1)),
            failed("dropped"),
        ],
        vec![failed("boom")],
        vec![failed("boom")],
    ]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: Some(tuning(1, 2, 30)),
    });

    channel.start_monitoring("tr-1").unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // Failure #1 consumes one attempt; the open resets the counter, so the
    // post-open failures get the full budget again before exhaustion.
    assert_eq!(transport.connects(), 4);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 1);
    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.iter().filter(|e| e.contains("exhausted")).count(), 1);
    // Connected flag: up on open, down on exhaustion.
    assert_eq!(
        *recorder.connection_changes.lock().unwrap(),
        vec![true, false]
    );
}

#[tokio::test(start_paused = true)]
async fn test_switching_traces_tears_down_previous_subscription() {
    let transport = ScriptedTransport::new(vec![vec![Step::Emit(TransportEvent::Opened)]]);
    let channel = UpdateChannel::new(transport.clone());
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: None,
    });

    channel.start_monitoring("tr-1").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(channel.is_connected());

    channel.start_monitoring("tr-2").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.connects(), 2);
    assert_eq!(channel.monitored_trace().as_deref(), Some("tr-2"));
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    assert!(channel.is_connected());
}

#[tokio::test]
async fn test_stop_monitoring_is_idempotent() {
    let transport = ScriptedTransport::new(vec![vec![Step::Emit(TransportEvent::Opened)]]);
    let channel = UpdateChannel::new(transport);
    let recorder = Arc::new(Recorder::default());
    channel.update_options(ChannelOptions {
        handlers: Some(recording_handlers(&recorder)),
        tuning: None,
    });

    // Never started: both calls are no-ops.
    channel.stop_monitoring();
    channel.stop_monitoring();
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 0);

    channel.start_monitoring("tr-1").unwrap();
    channel.stop_monitoring();
    channel.stop_monitoring();
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}
