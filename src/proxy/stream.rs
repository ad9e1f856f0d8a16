//! SSE decoding and text-delta relay.
//!
//! The pipeline is pull-based: [`relay_fragments`] pulls one upstream chunk
//! at a time, feeds it to an [`SseDecoder`], turns each complete event into a
//! [`DeltaFragment`] and yields the fragment text as raw bytes. Nothing is
//! read from upstream until the consumer asks for more, and dropping the
//! returned stream drops the upstream body with it.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::types::ChatCompletionChunk;
use crate::error::RelayError;

/// Sentinel payload that ends a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DEFAULT_EVENT_KIND: &str = "message";

/// One dispatched SSE event, independent of payload semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Value of the `event:` field, `"message"` when absent.
    pub kind: String,
    /// `data:` field values joined with `\n`.
    pub data: String,
    /// Value of the last `id:` field seen in this event.
    pub id: Option<String>,
}

/// Incremental SSE parser.
///
/// Bytes go in through [`feed`](Self::feed); complete events come out through
/// [`next_event`](Self::next_event). Partial lines (including partial UTF-8
/// sequences) and partially-built events carry over between feeds. Whatever is
/// still buffered when the input ends is discarded, never dispatched.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    skip_lf: bool,
    bom_checked: bool,
    kind: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    ready: VecDeque<StreamEvent>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of raw bytes. Chunk boundaries may fall anywhere.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match byte {
                b'\n' if self.skip_lf => self.skip_lf = false,
                b'\n' => self.end_line(),
                b'\r' => {
                    self.end_line();
                    self.skip_lf = true;
                }
                _ => {
                    self.skip_lf = false;
                    self.line.push(byte);
                }
            }
        }
    }

    /// Pop the next complete event, if one is ready.
    pub fn next_event(&mut self) -> Option<StreamEvent> {
        self.ready.pop_front()
    }

    /// True when a partial line or undispatched event is still buffered.
    pub fn has_pending(&self) -> bool {
        !self.line.is_empty() || !self.data.is_empty() || self.kind.is_some()
    }

    fn end_line(&mut self) {
        let raw = std::mem::take(&mut self.line);
        let mut line = String::from_utf8_lossy(&raw).into_owned();

        if !self.bom_checked {
            self.bom_checked = true;
            if let Some(stripped) = line.strip_prefix('\u{feff}') {
                line = stripped.to_string();
            }
        }

        self.process_line(&line);
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.kind = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let kind = self.kind.take();
        if self.data.is_empty() {
            return;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        self.ready.push_back(StreamEvent {
            kind: kind.unwrap_or_else(|| DEFAULT_EVENT_KIND.to_string()),
            data,
            id: self.id.clone(),
        });
    }
}

/// Decode a byte-chunk stream into SSE events.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_events<S, E>(chunks: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        futures::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    decoder.feed(&bytes);
                    while let Some(event) = decoder.next_event() {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if decoder.has_pending() {
            tracing::debug!("Upstream ended mid-event; discarding partial event");
        }
    }
}

/// What one event contributes to the outgoing stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaFragment {
    Text(String),
    Done,
}

/// Interpret an event payload as a completion chunk.
///
/// Only a payload that is not JSON at all is malformed. A missing content
/// field is an empty fragment, so role-only and heartbeat events pass
/// through harmlessly.
pub fn extract_delta(event: &StreamEvent) -> Result<DeltaFragment, RelayError> {
    if event.data == DONE_SENTINEL {
        return Ok(DeltaFragment::Done);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(&event.data)
        .map_err(|e| RelayError::MalformedUpstreamPayload(e.to_string()))?;

    Ok(DeltaFragment::Text(chunk.first_content().unwrap_or_default()))
}

/// Turn an upstream SSE body into the outgoing raw-text byte stream.
///
/// Ends cleanly on `[DONE]` or when upstream closes. A malformed payload or
/// an upstream read failure is yielded as the final item, which makes the
/// transport abort the response instead of closing it.
pub fn relay_fragments<S, E>(upstream: S) -> impl Stream<Item = Result<Bytes, RelayError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        let events = decode_events(upstream);
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "Error reading upstream stream");
                    yield Err(RelayError::UpstreamUnreachable(e.to_string()));
                    return;
                }
            };

            match extract_delta(&event) {
                Ok(DeltaFragment::Text(text)) => {
                    if !text.is_empty() {
                        yield Ok(Bytes::from(text));
                    }
                }
                Ok(DeltaFragment::Done) => return,
                Err(e) => {
                    tracing::error!(error = %e, "Aborting relay on malformed upstream event");
                    yield Err(e);
                    return;
                }
            }
        }

        tracing::warn!("Upstream closed without [DONE]");
    }
}
