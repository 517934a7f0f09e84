//! Presents an EVT application as if it were a SYNC application: builds a
//! scope, schedules the EVT application as a task on the shared scheduler,
//! feeds its request body on demand, and exposes its response as a
//! blocking iterable of body chunks.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::environ::{Environ, ReadChunkSource, WsgiErrors, WsgiInput};
use crate::error::{AdapterError, StreamError};
use crate::evt_app::{EvtApp, ReceiveChannel, SendChannel};
use crate::messages::{request_message_from_chunk, EvtMessage, EvtResponseMessage};
use crate::scheduler::Scheduler;
use crate::status;
use crate::streams::{
    AsyncProducer, AsyncToSyncStream, SyncConsumer, SyncProducer, SyncToAsyncStream,
};
use crate::sync_app::{BoxBodyIter, StartResponse, SyncApp};
use crate::translate::environ_to_scope;

const REQUEST_CHUNK_SIZE: usize = 16 * 1024;

/// Tunables for an [`EvtToSync`] instance.
#[derive(Debug, Clone)]
pub struct EvtToSyncConfig {
    /// How long to wait for the wrapped task to finish after the response
    /// iterator has been exhausted, before cancelling it. `None` waits
    /// indefinitely.
    pub wait_time: Option<Duration>,
    /// Capacity of the REQ and RESP bounded queues.
    pub send_queue_size: usize,
}

impl Default for EvtToSyncConfig {
    fn default() -> Self {
        EvtToSyncConfig {
            wait_time: None,
            send_queue_size: 10,
        }
    }
}

/// Wraps an [`EvtApp`] so it can be driven through the SYNC calling
/// convention: `(environ, start_response) -> iterable of bytes`.
pub struct EvtToSync<A: EvtApp> {
    app: Arc<A>,
    scheduler: Scheduler,
    config: EvtToSyncConfig,
}

impl<A: EvtApp> EvtToSync<A> {
    pub fn new(app: A, scheduler: Scheduler, config: EvtToSyncConfig) -> Self {
        EvtToSync {
            app: Arc::new(app),
            scheduler,
            config,
        }
    }
}

impl<A: EvtApp> SyncApp for EvtToSync<A> {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: StartResponse,
    ) -> Result<BoxBodyIter, AdapterError> {
        let mut scope = environ_to_scope(&environ.vars);
        scope.wsgi_environ = Some(Arc::new(snapshot_environ(environ)));
        let span = tracing::error_span!(
            "evt_to_sync_request",
            method = %scope.method,
            path = %scope.path,
        );
        let _guard = span.enter();
        tracing::debug!("dispatching evt application");

        let placeholder = WsgiInput::new(ReadChunkSource::new(io::empty()));
        let input = std::mem::replace(&mut environ.input, placeholder);

        let (req_producer, req_consumer) = SyncToAsyncStream::channel::<Bytes>(self.config.send_queue_size);
        let handle = self.scheduler.handle();
        let (resp_producer, resp_consumer) = AsyncToSyncStream::channel::<EvtResponseMessage>(
            self.config.send_queue_size,
            handle.clone(),
        );
        let resp_producer = Arc::new(resp_producer);

        spawn_request_feeder(input, req_producer);

        let app = self.app.clone();
        let task_resp = resp_producer.clone();
        let task_span = span.clone();
        let task = self.scheduler.spawn(
            async move {
                let mut receive_impl = ChannelReceive {
                    consumer: req_consumer,
                    disconnected: false,
                };
                let mut send_impl = ChannelSend {
                    producer: task_resp.clone(),
                };
                match app.call(scope, &mut receive_impl, &mut send_impl).await {
                    Ok(()) => task_resp.aclose(),
                    Err(err) => {
                        tracing::error!("evt application failed: {err}");
                        task_resp.aclose_with_error(err)
                    }
                }
            }
            .instrument(task_span),
        );

        let mut resp_consumer = resp_consumer;
        let first = resp_consumer
            .get(None)
            .map_err(stream_error_to_adapter_error)?;
        match first {
            EvtResponseMessage::HttpResponseStart { status, headers, .. } => {
                let decoded_headers = headers
                    .into_iter()
                    .map(|(name, value)| {
                        (
                            String::from_utf8_lossy(&name).into_owned(),
                            latin1_decode(&value),
                        )
                    })
                    .collect();
                start_response.start(&status::status_line(status), decoded_headers)?;
            }
            EvtResponseMessage::HttpResponseBody { .. } => {
                return Err(AdapterError::protocol(
                    "http.response.body sent before http.response.start",
                ));
            }
        }

        Ok(Box::new(ResponseBodyIter {
            consumer: resp_consumer,
            done: false,
            task: Some(task),
            handle,
            wait_time: self.config.wait_time,
        }))
    }
}

/// Reads `environ.input` on a dedicated blocking thread and forwards
/// chunks into REQ, closing it at EOF. Exits early (without error) if the
/// task-side consumer stops reading, e.g. the application discarded the
/// rest of a large upload.
fn spawn_request_feeder(mut input: WsgiInput, producer: SyncProducer<Bytes>) {
    std::thread::spawn(move || loop {
        match input.read(Some(REQUEST_CHUNK_SIZE)) {
            Ok(bytes) if bytes.is_empty() => {
                producer.close();
                return;
            }
            Ok(bytes) => {
                if producer.put(bytes).is_err() {
                    return;
                }
            }
            Err(io_err) => {
                producer.close_with_error(AdapterError::Io(io_err));
                return;
            }
        }
    });
}

struct ChannelReceive {
    consumer: crate::streams::AsyncConsumer<Bytes>,
    disconnected: bool,
}

#[async_trait]
impl ReceiveChannel for ChannelReceive {
    async fn receive(&mut self) -> Result<EvtMessage, AdapterError> {
        if self.disconnected {
            return Ok(EvtMessage::HttpDisconnect);
        }
        match self.consumer.aget().await {
            Ok(bytes) => Ok(request_message_from_chunk(Some(bytes))),
            Err(StreamError::Eof) => Ok(request_message_from_chunk(None)),
            Err(StreamError::Closed(err)) if err.is_disconnect() => {
                self.disconnected = true;
                Ok(EvtMessage::HttpDisconnect)
            }
            Err(StreamError::Closed(err)) => Err(err),
            Err(StreamError::Timeout) => unreachable!("REQ never uses a timed get"),
        }
    }
}

struct ChannelSend {
    producer: Arc<AsyncProducer<EvtResponseMessage>>,
}

#[async_trait]
impl SendChannel for ChannelSend {
    async fn send(&mut self, message: EvtResponseMessage) -> Result<(), AdapterError> {
        self.producer
            .aput(message)
            .await
            .map_err(|_| AdapterError::Disconnect)
    }
}

/// The SYNC-side response iterator: pulls `http.response.body` messages
/// out of RESP, and on drop awaits (bounded by `wait_time`) the wrapped
/// task's completion, cancelling it if the bound expires.
struct ResponseBodyIter {
    consumer: SyncConsumer<EvtResponseMessage>,
    done: bool,
    task: Option<tokio::task::JoinHandle<()>>,
    handle: Handle,
    wait_time: Option<Duration>,
}

impl Iterator for ResponseBodyIter {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.consumer.get(None) {
            Ok(EvtResponseMessage::HttpResponseBody { body, more_body }) => {
                if !more_body {
                    self.done = true;
                }
                Some(Ok(body))
            }
            Ok(EvtResponseMessage::HttpResponseStart { .. }) => {
                self.done = true;
                Some(Err(io::Error::new(
                    io::ErrorKind::Other,
                    AdapterError::protocol("duplicate http.response.start"),
                )))
            }
            Err(StreamError::Eof) => {
                self.done = true;
                None
            }
            Err(StreamError::Closed(err)) => {
                self.done = true;
                Some(Err(io::Error::new(io::ErrorKind::Other, err)))
            }
            Err(StreamError::Timeout) => unreachable!("RESP body reads never use a timed get"),
        }
    }
}

impl Drop for ResponseBodyIter {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let abort_handle = task.abort_handle();
        let outcome = match self.wait_time {
            None => Some(self.handle.block_on(task)),
            Some(duration) => self
                .handle
                .block_on(async { tokio::time::timeout(duration, task).await })
                .ok(),
        };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(join_err)) if join_err.is_cancelled() => {}
            Some(Err(join_err)) => tracing::error!("evt application task panicked: {join_err}"),
            None => {
                tracing::debug!("evt application task exceeded wait_time; cancelling");
                abort_handle.abort();
            }
        }
    }
}

fn stream_error_to_adapter_error(err: StreamError) -> AdapterError {
    match err {
        StreamError::Eof => AdapterError::protocol("evt application closed without responding"),
        StreamError::Closed(err) => err,
        StreamError::Timeout => unreachable!("RESP start read never uses a timed get"),
    }
}

fn snapshot_environ(environ: &Environ) -> Environ {
    Environ {
        vars: environ.vars.clone(),
        input: WsgiInput::new(ReadChunkSource::new(io::empty())),
        errors: WsgiErrors,
        multithread: environ.multithread,
        multiprocess: environ.multiprocess,
        run_once: environ.run_once,
        asgi_scope: None,
    }
}

fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
