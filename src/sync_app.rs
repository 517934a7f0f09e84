//! The SYNC-side calling convention: a blocking function called once per
//! request with an environ and a `start_response` callback, returning an
//! iterable of response byte chunks.

use std::sync::Mutex;

use bytes::Bytes;

use crate::environ::Environ;
use crate::error::AdapterError;

/// The iterable of response byte chunks a [`SyncApp`] returns.
pub type BoxBodyIter = Box<dyn Iterator<Item = std::io::Result<Bytes>> + Send>;

/// A SYNC application: `(environ, start_response) -> iterable of bytes`,
/// run on a blocking worker thread.
pub trait SyncApp: Send + Sync + 'static {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: StartResponse,
    ) -> Result<BoxBodyIter, AdapterError>;
}

impl<F> SyncApp for F
where
    F: Fn(&mut Environ, StartResponse) -> Result<BoxBodyIter, AdapterError> + Send + Sync + 'static,
{
    fn call(
        &self,
        environ: &mut Environ,
        start_response: StartResponse,
    ) -> Result<BoxBodyIter, AdapterError> {
        self(environ, start_response)
    }
}

/// The response-start artifact queued by `start_response` but not flushed
/// until the first body chunk (or end of iteration) forces the issue.
#[derive(Debug, Clone)]
pub struct ResponseStart {
    pub status: u16,
    pub headers: Vec<(Bytes, Bytes)>,
    pub trailers: bool,
}

/// The three states a response-start artifact moves through: nothing
/// queued yet, a start queued but not yet handed to the peer, or already
/// handed off. Exposed so a caller hosting a [`SyncApp`] directly (rather
/// than through [`crate::sync_to_evt`]) can construct the matching
/// [`StartResponse`]/recorder pair and observe what the app declared.
#[derive(Debug)]
pub enum PendingSlot {
    NotStarted,
    Queued(ResponseStart),
    Flushed,
}

/// Handle passed to a [`SyncApp`] for declaring its response status and
/// headers. Calling it queues the start artifact; it is only actually
/// emitted to the peer once the first body chunk is produced (or, if the
/// app produces no body at all, once iteration ends). Whoever is hosting
/// the [`SyncApp`] (an adapter, or a caller wiring one up directly) reads
/// the queued artifact back out with [`take_pending`].
pub struct StartResponse {
    pending: std::sync::Arc<Mutex<PendingSlot>>,
}

impl StartResponse {
    /// Builds a fresh, unstarted [`StartResponse`] plus the slot its host
    /// reads the queued artifact from via [`take_pending`].
    pub fn new() -> (Self, std::sync::Arc<Mutex<PendingSlot>>) {
        let pending = std::sync::Arc::new(Mutex::new(PendingSlot::NotStarted));
        (
            StartResponse {
                pending: pending.clone(),
            },
            pending,
        )
    }

    /// `status` is `"<code> <phrase>"`; only the leading integer is used.
    /// `headers` is an ordered `(name, value)` sequence, encoded latin-1.
    pub fn start(&self, status: &str, headers: Vec<(String, String)>) -> Result<(), AdapterError> {
        self.start_inner(status, headers, None)
    }

    /// As [`Self::start`], but for the `exc_info` calling convention: if no
    /// body chunk has been flushed yet, this replaces the pending start; if
    /// one already has, `err` is re-raised on the worker thread instead.
    pub fn start_with_exc_info(
        &self,
        status: &str,
        headers: Vec<(String, String)>,
        err: crate::error::BoxError,
    ) -> Result<(), AdapterError> {
        {
            let guard = self.pending.lock().unwrap();
            if matches!(*guard, PendingSlot::Flushed) {
                return Err(AdapterError::Application(err));
            }
        }
        self.start_inner(status, headers, None)
    }

    fn start_inner(
        &self,
        status: &str,
        headers: Vec<(String, String)>,
        trailers: Option<bool>,
    ) -> Result<(), AdapterError> {
        let mut guard = self.pending.lock().unwrap();
        if matches!(*guard, PendingSlot::Flushed) {
            return Err(AdapterError::protocol(
                "start_response called again after the response already started",
            ));
        }
        let code = parse_status_code(status)?;
        let encoded = headers
            .into_iter()
            .map(|(name, value)| (Bytes::from(name.into_bytes()), latin1_encode(&value)))
            .collect();
        *guard = PendingSlot::Queued(ResponseStart {
            status: code,
            headers: encoded,
            trailers: trailers.unwrap_or(false),
        });
        Ok(())
    }
}

fn latin1_encode(s: &str) -> Bytes {
    Bytes::from(s.chars().map(|c| c as u8).collect::<Vec<u8>>())
}

fn parse_status_code(status: &str) -> Result<u16, AdapterError> {
    let code_str = status.split(' ').next().unwrap_or(status);
    code_str
        .parse::<u16>()
        .map_err(|_| AdapterError::protocol(format!("invalid status line: {status:?}")))
}

/// Takes the queued start artifact, if one hasn't already been taken.
/// Idempotent like the rest of this module's close/flush semantics:
/// calling it again after a flush returns `None`.
pub fn take_pending(slot: &Mutex<PendingSlot>) -> Option<ResponseStart> {
    let mut guard = slot.lock().unwrap();
    match std::mem::replace(&mut *guard, PendingSlot::Flushed) {
        PendingSlot::Queued(start) => Some(start),
        PendingSlot::Flushed => None,
        PendingSlot::NotStarted => {
            *guard = PendingSlot::NotStarted;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_start_after_flush_is_a_protocol_violation() {
        let (start_response, pending) = StartResponse::new();
        start_response.start("200 OK", vec![]).unwrap();
        assert!(take_pending(&pending).is_some());
        let err = start_response.start("201 Created", vec![]).unwrap_err();
        assert!(matches!(err, AdapterError::Protocol(_)));
    }

    #[test]
    fn exc_info_before_flush_replaces_pending_start() {
        let (start_response, pending) = StartResponse::new();
        start_response.start("500 Internal Server Error", vec![]).unwrap();
        start_response
            .start_with_exc_info("200 OK", vec![], "ignored".into())
            .unwrap();
        let flushed = take_pending(&pending).unwrap();
        assert_eq!(flushed.status, 200);
    }

    #[test]
    fn exc_info_after_flush_reraises() {
        let (start_response, pending) = StartResponse::new();
        start_response.start("200 OK", vec![]).unwrap();
        take_pending(&pending);
        let err = start_response
            .start_with_exc_info("500 Internal Server Error", vec![], "boom".into())
            .unwrap_err();
        assert!(matches!(err, AdapterError::Application(_)));
    }
}
