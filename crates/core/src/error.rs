// crates/core/src/error.rs
use thiserror::Error;

/// Errors that can occur when decoding trace data from the wire.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed trace snapshot for {trace_id}: {message}")]
    Snapshot { trace_id: String, message: String },
}
