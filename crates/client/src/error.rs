// crates/client/src/error.rs
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when fetching a trace snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("trace not found: {trace_id}")]
    NotFound { trace_id: String },

    #[error("trace request for {trace_id} failed with status {status}")]
    Status { trace_id: String, status: u16 },

    #[error("trace request for {trace_id} failed: {source}")]
    Request {
        trace_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Decode(#[from] runview_core::DecodeError),
}

/// Errors surfaced by the live update channel.
///
/// Only `EmptyTraceId` is returned synchronously; everything else funnels
/// through the channel's `on_error` callback so consumers can render
/// connection status without wrapping every call.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("trace id must not be empty")]
    EmptyTraceId,

    #[error("failed to create stream transport: {message}")]
    TransportCreate { message: String },

    #[error("malformed update payload: {message}")]
    Parse { message: String },

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("no messages for {silent_for:?}; stream considered stale")]
    HeartbeatTimeout { silent_for: Duration },
}

/// Errors from the monitor coordination layer.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
