//! Presents a SYNC application as if it were an EVT application: receives
//! EVT messages, assembles an environ, dispatches the SYNC app on a worker
//! thread, and streams its response back as `http.response.*` messages.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::environ::{Environ, StreamChunkSource, WsgiInput};
use crate::error::{AdapterError, StreamError};
use crate::evt_app::{EvtApp, ReceiveChannel, SendChannel};
use crate::messages::{EvtMessage, EvtResponseMessage};
use crate::scope::{Scope, ScopeType};
use crate::streams::{
    AsyncConsumer, AsyncProducer, AsyncToSyncStream, SyncProducer, SyncToAsyncStream,
};
use crate::sync_app::{take_pending, PendingSlot, ResponseStart, StartResponse, SyncApp};
use crate::translate::scope_to_environ_vars;

/// Tunables for a [`SyncToEvt`] instance. All defaults match the
/// originating calling convention's usual server defaults.
#[derive(Debug, Clone)]
pub struct SyncToEvtConfig {
    /// Maximum number of SYNC application invocations running
    /// concurrently on worker threads.
    pub workers: usize,
    /// Capacity of the REQ and RESP bounded queues.
    pub send_queue_size: usize,
}

impl Default for SyncToEvtConfig {
    fn default() -> Self {
        SyncToEvtConfig {
            workers: 10,
            send_queue_size: 10,
        }
    }
}

/// Wraps a [`SyncApp`] so it can be driven through the EVT calling
/// convention: `(scope, receive, send)`.
pub struct SyncToEvt<A: SyncApp> {
    app: Arc<A>,
    config: SyncToEvtConfig,
    worker_slots: Arc<tokio::sync::Semaphore>,
}

impl<A: SyncApp> SyncToEvt<A> {
    pub fn new(app: A, config: SyncToEvtConfig) -> Self {
        let worker_slots = Arc::new(tokio::sync::Semaphore::new(config.workers));
        SyncToEvt {
            app: Arc::new(app),
            config,
            worker_slots,
        }
    }
}

#[async_trait]
impl<A: SyncApp> EvtApp for SyncToEvt<A> {
    async fn call(
        &self,
        scope: Scope,
        receive: &mut dyn ReceiveChannel,
        send: &mut dyn SendChannel,
    ) -> Result<(), AdapterError> {
        if scope.scope_type != ScopeType::Http {
            // Lifespan/other scope types get trivial acknowledgement only;
            // there's no SYNC-side equivalent to dispatch to.
            return Ok(());
        }

        let span = tracing::error_span!("sync_to_evt_request", method = %scope.method, path = %scope.path);
        async move {
            let permit = self
                .worker_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AdapterError::protocol("worker pool shut down"))?;

            let handle = Handle::current();
            // REQ: task produces (from the real `receive()`), worker thread
            // consumes via `wsgi.input`.
            let (req_producer, req_consumer) =
                AsyncToSyncStream::channel::<Bytes>(self.config.send_queue_size, handle);
            // RESP: worker thread produces response artifacts, task consumes
            // and forwards to the real `send()`.
            let (resp_producer, mut resp_consumer) =
                SyncToAsyncStream::channel::<EvtResponseMessage>(self.config.send_queue_size);

            let vars = scope_to_environ_vars(&scope);
            let scope_arc = Arc::new(scope);
            let input = WsgiInput::new(StreamChunkSource::new(req_consumer));
            let mut environ = Environ::new(input);
            environ.vars = vars;
            environ.asgi_scope = Some(scope_arc);

            let (start_response, pending) = StartResponse::new();
            let app = self.app.clone();
            let worker = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                run_sync_worker(app.as_ref(), environ, start_response, pending, resp_producer)
            });

            let cancel = CancellationToken::new();
            let feed = feed_request_loop(receive, req_producer, cancel.clone());
            let drain = drain_response_loop(send, &mut resp_consumer, cancel);

            let (_, drain_res) = tokio::join!(feed, drain);
            worker.await.map_err(|join_err| {
                AdapterError::application(format!("worker thread panicked: {join_err}"))
            })?;
            if let Err(err) = &drain_res {
                tracing::error!("sync app request failed: {err}");
            } else {
                tracing::debug!("sync app request completed");
            }
            drain_res
        }
        .instrument(span)
        .await
    }
}

/// Pulls `http.request`/`http.disconnect` messages from the real EVT peer
/// and forwards request bodies into REQ. Runs until the body is exhausted,
/// the peer disconnects, or the worker thread stops reading (e.g. it
/// discarded the rest of a large upload).
async fn feed_request_loop(
    receive: &mut dyn ReceiveChannel,
    req_producer: AsyncProducer<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let message = match receive.receive().await {
            Ok(message) => message,
            Err(_) => {
                req_producer.aclose_with_error(AdapterError::Disconnect);
                cancel.cancel();
                return;
            }
        };
        match message {
            EvtMessage::HttpRequest { body, more_body } => {
                if !body.is_empty() && req_producer.aput(body).await.is_err() {
                    // Worker already finished (and dropped its consumer),
                    // e.g. it never read the whole body. Not an error.
                    return;
                }
                if !more_body {
                    req_producer.aclose();
                    return;
                }
            }
            EvtMessage::HttpDisconnect => {
                req_producer.aclose_with_error(AdapterError::Disconnect);
                cancel.cancel();
                return;
            }
        }
    }
}

/// Pulls response artifacts out of RESP and forwards them to the real EVT
/// peer's `send()`, stopping early if `cancel` fires (the request
/// disconnected and nothing further needs to reach the peer).
async fn drain_response_loop(
    send: &mut dyn SendChannel,
    resp_consumer: &mut AsyncConsumer<EvtResponseMessage>,
    cancel: CancellationToken,
) -> Result<(), AdapterError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            item = resp_consumer.aget() => {
                match item {
                    Ok(msg) => {
                        let terminal = matches!(
                            &msg,
                            EvtResponseMessage::HttpResponseBody { more_body: false, .. }
                        );
                        send.send(msg).await?;
                        if terminal {
                            return Ok(());
                        }
                    }
                    Err(StreamError::Eof) => return Ok(()),
                    Err(StreamError::Closed(err)) => return Err(err),
                    Err(StreamError::Timeout) => unreachable!("RESP never uses a timed get"),
                }
            }
        }
    }
}

/// Runs the wrapped SYNC application to completion on the calling
/// (blocking) thread, flushing the queued response start on the first
/// body chunk (or at end of iteration if the app produced none), and
/// closing `resp_producer` with an error on any failure.
fn run_sync_worker<A: SyncApp>(
    app: &A,
    mut environ: Environ,
    start_response: StartResponse,
    pending: Arc<Mutex<PendingSlot>>,
    resp_producer: SyncProducer<EvtResponseMessage>,
) {
    let iter = match app.call(&mut environ, start_response) {
        Ok(iter) => iter,
        Err(err) => {
            resp_producer.close_with_error(err);
            return;
        }
    };

    let mut flushed = false;
    for chunk in iter {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(io_err) => {
                resp_producer.close_with_error(AdapterError::Io(io_err));
                return;
            }
        };
        if !flushed {
            match take_pending(&pending) {
                Some(start) => {
                    if flush_start(&resp_producer, start).is_err() {
                        return;
                    }
                    flushed = true;
                }
                None => {
                    resp_producer.close_with_error(AdapterError::protocol(
                        "response body produced before start_response was called",
                    ));
                    return;
                }
            }
        }
        if resp_producer
            .put(EvtResponseMessage::HttpResponseBody {
                body: bytes,
                more_body: true,
            })
            .is_err()
        {
            return;
        }
    }

    if !flushed {
        match take_pending(&pending) {
            Some(start) => {
                if flush_start(&resp_producer, start).is_err() {
                    return;
                }
            }
            None => {
                resp_producer
                    .close_with_error(AdapterError::protocol("start_response was never called"));
                return;
            }
        }
    }

    let _ = resp_producer.put(EvtResponseMessage::HttpResponseBody {
        body: Bytes::new(),
        more_body: false,
    });
    resp_producer.close();
}

fn flush_start(
    resp_producer: &SyncProducer<EvtResponseMessage>,
    start: ResponseStart,
) -> Result<(), StreamError> {
    resp_producer.put(EvtResponseMessage::HttpResponseStart {
        status: start.status,
        headers: start.headers,
        trailers: start.trailers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedReceive {
        messages: VecDeque<EvtMessage>,
    }

    #[async_trait]
    impl ReceiveChannel for ScriptedReceive {
        async fn receive(&mut self) -> Result<EvtMessage, AdapterError> {
            Ok(self
                .messages
                .pop_front()
                .unwrap_or(EvtMessage::HttpRequest {
                    body: Bytes::new(),
                    more_body: false,
                }))
        }
    }

    struct CollectingSend {
        sent: Arc<AsyncMutex<Vec<EvtResponseMessage>>>,
    }

    #[async_trait]
    impl SendChannel for CollectingSend {
        async fn send(&mut self, message: EvtResponseMessage) -> Result<(), AdapterError> {
            self.sent.lock().await.push(message);
            Ok(())
        }
    }

    fn echo_app(environ: &mut Environ, start_response: StartResponse) -> Result<crate::sync_app::BoxBodyIter, AdapterError> {
        let body = environ.input.read(None).map_err(AdapterError::Io)?;
        start_response
            .start("200 OK", vec![("Content-Type".to_string(), "text/plain".to_string())])
            .unwrap();
        let chunk: io::Result<Bytes> = Ok(body);
        Ok(Box::new(std::iter::once(chunk)))
    }

    #[tokio::test]
    async fn echoes_request_body_back_as_response() {
        let adapter = SyncToEvt::new(
            echo_app as fn(&mut Environ, StartResponse) -> Result<crate::sync_app::BoxBodyIter, AdapterError>,
            SyncToEvtConfig::default(),
        );
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let mut receive = ScriptedReceive {
            messages: VecDeque::from(vec![EvtMessage::HttpRequest {
                body: Bytes::from_static(b"hello"),
                more_body: false,
            }]),
        };
        let mut send = CollectingSend { sent: sent.clone() };

        adapter
            .call(Scope::http("GET", "/echo"), &mut receive, &mut send)
            .await
            .unwrap();

        let sent = sent.lock().await;
        assert!(matches!(
            sent[0],
            EvtResponseMessage::HttpResponseStart { status: 200, .. }
        ));
        match &sent[1] {
            EvtResponseMessage::HttpResponseBody { body, more_body: true } => {
                assert_eq!(&body[..], b"hello");
            }
            other => panic!("expected body chunk, got {other:?}"),
        }
        assert!(matches!(
            sent[2],
            EvtResponseMessage::HttpResponseBody { more_body: false, .. }
        ));
    }

    fn body_before_start_app(
        _environ: &mut Environ,
        _start_response: StartResponse,
    ) -> Result<crate::sync_app::BoxBodyIter, AdapterError> {
        let chunk: io::Result<Bytes> = Ok(Bytes::from_static(b"oops"));
        Ok(Box::new(std::iter::once(chunk)))
    }

    #[tokio::test]
    async fn body_before_start_response_is_a_protocol_violation() {
        let adapter = SyncToEvt::new(
            body_before_start_app
                as fn(&mut Environ, StartResponse) -> Result<crate::sync_app::BoxBodyIter, AdapterError>,
            SyncToEvtConfig::default(),
        );
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let mut receive = ScriptedReceive {
            messages: VecDeque::new(),
        };
        let mut send = CollectingSend { sent: sent.clone() };

        let err = adapter
            .call(Scope::http("GET", "/broken"), &mut receive, &mut send)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Protocol(_)));
    }

    #[tokio::test]
    async fn disconnect_mid_upload_stops_draining_response() {
        fn hangs_on_input(
            environ: &mut Environ,
            start_response: StartResponse,
        ) -> Result<crate::sync_app::BoxBodyIter, AdapterError> {
            // Blocks until REQ closes (with our Disconnect error).
            let result = environ.input.read(None);
            assert!(result.is_err());
            start_response.start("200 OK", vec![]).unwrap();
            let chunk: io::Result<Bytes> = Ok(Bytes::new());
            Ok(Box::new(std::iter::once(chunk)))
        }

        let adapter = SyncToEvt::new(
            hangs_on_input
                as fn(&mut Environ, StartResponse) -> Result<crate::sync_app::BoxBodyIter, AdapterError>,
            SyncToEvtConfig::default(),
        );
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let mut receive = ScriptedReceive {
            messages: VecDeque::from(vec![EvtMessage::HttpDisconnect]),
        };
        let mut send = CollectingSend { sent: sent.clone() };

        adapter
            .call(Scope::http("POST", "/upload"), &mut receive, &mut send)
            .await
            .unwrap();
    }
}
