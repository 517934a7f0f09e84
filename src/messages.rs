//! The message types exchanged across the EVT `receive`/`send` boundary.
//!
//! Both adapters use the same two enums regardless of direction: in
//! `SYNC→EVT` they're what the adapter forwards to/from the *real* EVT
//! peer; in `EVT→SYNC` they're what the wrapped application's `receive`/
//! `send` calls produce and consume against the adapter's internal
//! streams.

use bytes::Bytes;

/// A message flowing from server/adapter toward an EVT application's
/// `receive()`.
#[derive(Debug, Clone)]
pub enum EvtMessage {
    /// `http.request`. Terminal when `more_body` is `false`.
    HttpRequest { body: Bytes, more_body: bool },
    /// `http.disconnect`. May follow the terminal `HttpRequest` or arrive
    /// instead of it if the peer goes away mid-body.
    HttpDisconnect,
}

/// A message flowing from an EVT application's `send()` toward the
/// server/adapter.
#[derive(Debug, Clone)]
pub enum EvtResponseMessage {
    /// `http.response.start`. Must be the first message of a response.
    HttpResponseStart {
        status: u16,
        headers: Vec<(Bytes, Bytes)>,
        trailers: bool,
    },
    /// `http.response.body`. Terminal when `more_body` is `false`.
    HttpResponseBody { body: Bytes, more_body: bool },
}

impl EvtResponseMessage {
    pub fn is_start(&self) -> bool {
        matches!(self, EvtResponseMessage::HttpResponseStart { .. })
    }
}

/// Wraps a plain byte-chunk stream (as produced/consumed by the bounded
/// stream primitives) into the `http.request` framing that `receive()`
/// implementations hand back to applications. Shared by both adapter
/// directions, since the framing rule ("empty body + `more_body=false`
/// marks the end, `wsgi.input` never raises on EOF") is the same either
/// way.
pub(crate) fn request_message_from_chunk(chunk: Option<Bytes>) -> EvtMessage {
    match chunk {
        Some(body) => EvtMessage::HttpRequest {
            body,
            more_body: true,
        },
        None => EvtMessage::HttpRequest {
            body: Bytes::new(),
            more_body: false,
        },
    }
}
