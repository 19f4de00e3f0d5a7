// crates/client/src/sse.rs
//! Stream transport for trace update events.
//!
//! The backend pushes JSON payloads over an SSE endpoint keyed by trace id.
//! [`StreamTransport`] is the seam the live update channel talks to; the
//! production implementation is [`SseTransport`] on a streaming reqwest GET.
//! Construction problems (a bad endpoint URL) fail `connect` itself;
//! everything that happens after construction (refused connection,
//! mid-stream I/O error, EOF) is reported in-stream.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::debug;

/// One event from the underlying transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and the server accepted the stream.
    Opened,
    /// A raw (undecoded) payload arrived.
    Message(String),
    /// The connection failed; the stream yields nothing after this.
    Failed(String),
}

pub type EventStream = BoxStream<'static, TransportEvent>;

/// Errors constructing a transport connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),
}

/// A factory for long-lived event streams, one subscription at a time.
pub trait StreamTransport: Send + Sync {
    fn connect(&self, trace_id: &str) -> Result<EventStream, TransportError>;
}

// =============================================================================
// SSE frame decoding
// =============================================================================

/// Incremental SSE frame decoder.
///
/// Feed it raw chunks as they arrive; it returns the payloads of every frame
/// completed so far. Handles frames split across chunk boundaries, multi-line
/// `data:` fields (joined with `\n`), CRLF line endings, and `:` comment
/// lines. `event:`/`id:`/`retry:` fields are ignored; the payload type
/// travels inside the JSON body on this protocol.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseFrameDecoder {
    /// Consume a chunk, returning the payloads of all frames it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.accept_line(line, &mut payloads);
        }
        payloads
    }

    fn accept_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            // Blank line dispatches the accumulated frame.
            if !self.data.is_empty() {
                payloads.push(self.data.join("\n"));
                self.data.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
}

// =============================================================================
// Production transport
// =============================================================================

/// SSE transport over a streaming HTTP GET.
pub struct SseTransport {
    base_url: String,
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl StreamTransport for SseTransport {
    fn connect(&self, trace_id: &str) -> Result<EventStream, TransportError> {
        let endpoint = format!("{}/api/traces/{}/stream", self.base_url, trace_id);
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let client = self.client.clone();

        let stream = async_stream::stream! {
            let response = match client
                .get(url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    yield TransportEvent::Failed(format!("stream request failed: {e}"));
                    return;
                }
            };
            if !response.status().is_success() {
                yield TransportEvent::Failed(format!(
                    "stream request failed with status {}",
                    response.status()
                ));
                return;
            }

            debug!(url = %response.url(), "update stream connected");
            yield TransportEvent::Opened;

            let mut decoder = SseFrameDecoder::default();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for payload in decoder.push(&bytes) {
                            yield TransportEvent::Message(payload);
                        }
                    }
                    Err(e) => {
                        yield TransportEvent::Failed(format!("stream read failed: {e}"));
                        return;
                    }
                }
            }
            yield TransportEvent::Failed("stream ended".to_string());
        };

        Ok(stream.boxed())
    }
}
