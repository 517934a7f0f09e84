//! Bounded FIFO primitives that carry bodies across the thread/task
//! boundary without buffering more than `capacity` items at a time.
//!
//! Two distinct primitives, not one symmetric queue, per the design note in
//! the adapters' shared contract: thread→task wakeups and task→thread
//! wakeups need different machinery, and a single polling queue would
//! defeat backpressure. Both are built on [`tokio::sync::mpsc`], which
//! already exposes the two wakeup disciplines we need: `blocking_send`/
//! `blocking_recv` for the thread side, plain `send`/`recv` for the task
//! side.
//!
//! [`SyncToAsyncStream`] — a blocking thread is the producer, a task is the
//! consumer. [`AsyncToSyncStream`] — a task is the producer, a blocking
//! thread is the consumer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{AdapterError, StreamError};

/// Tracks whether a stream has been closed, and if so, with what error (if
/// any). Closing twice is a no-op: only the first call's error is recorded,
/// and it is handed to the consumer's next read exactly once.
struct CloseSlot {
    inner: Mutex<Option<Option<AdapterError>>>,
}

impl CloseSlot {
    fn new() -> Self {
        CloseSlot {
            inner: Mutex::new(None),
        }
    }

    /// Idempotent. First call wins; later calls (with or without an error)
    /// are ignored.
    fn close(&self, err: Option<AdapterError>) {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Returns the attached error exactly once; `None` thereafter (or if
    /// the close carried no error).
    fn take_error(&self) -> Option<AdapterError> {
        let mut guard = self.inner.lock().unwrap();
        guard.as_mut().and_then(|slot| slot.take())
    }
}

fn eof_or_closed(close: &CloseSlot) -> StreamError {
    match close.take_error() {
        Some(err) => StreamError::Closed(err),
        None => StreamError::Eof,
    }
}

/// Thread-produced, task-consumed bounded stream.
pub struct SyncToAsyncStream;

impl SyncToAsyncStream {
    /// Allocates a fresh stream of the given capacity, returning the
    /// blocking-thread producer handle and the async-task consumer handle.
    pub fn channel<T: Send + 'static>(capacity: usize) -> (SyncProducer<T>, AsyncConsumer<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let close = Arc::new(CloseSlot::new());
        (
            SyncProducer {
                tx: Mutex::new(Some(tx)),
                close: close.clone(),
            },
            AsyncConsumer { rx, close },
        )
    }
}

/// The blocking-thread half of a [`SyncToAsyncStream`].
pub struct SyncProducer<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    close: Arc<CloseSlot>,
}

impl<T> SyncProducer<T> {
    /// Blocks the calling thread until a slot is free or the stream is
    /// closed. Must not be called from within an async task's executor
    /// thread (it will panic); it's meant for the dedicated worker threads
    /// the adapters run applications on.
    pub fn put(&self, item: T) -> Result<(), StreamError> {
        let tx = {
            let guard = self.tx.lock().unwrap();
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(eof_or_closed(&self.close)),
            }
        };
        tx.blocking_send(item)
            .map_err(|_| eof_or_closed(&self.close))
    }

    /// Idempotent. Wakes any pending consumer with EOF.
    pub fn close(&self) {
        self.close.close(None);
        self.tx.lock().unwrap().take();
    }

    /// Idempotent (first caller wins). Wakes any pending consumer with the
    /// attached error.
    pub fn close_with_error(&self, err: AdapterError) {
        self.close.close(Some(err));
        self.tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

/// The task half of a [`SyncToAsyncStream`].
pub struct AsyncConsumer<T> {
    rx: mpsc::Receiver<T>,
    close: Arc<CloseSlot>,
}

impl<T> AsyncConsumer<T> {
    /// Suspends the calling task until an item is available, the stream is
    /// closed (EOF), or an attached error surfaces.
    pub async fn aget(&mut self) -> Result<T, StreamError> {
        match self.rx.recv().await {
            Some(item) => Ok(item),
            None => Err(eof_or_closed(&self.close)),
        }
    }
}

/// Task-produced, thread-consumed bounded stream.
pub struct AsyncToSyncStream;

impl AsyncToSyncStream {
    /// Allocates a fresh stream, returning the async-task producer handle
    /// and the blocking-thread consumer handle. `handle` is the runtime
    /// the consumer uses to honor a `get(Some(timeout))` from a blocking
    /// context; it is ignored by the untimed `get(None)` path.
    pub fn channel<T: Send + 'static>(
        capacity: usize,
        handle: Handle,
    ) -> (AsyncProducer<T>, SyncConsumer<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let close = Arc::new(CloseSlot::new());
        (
            AsyncProducer {
                tx: Mutex::new(Some(tx)),
                close: close.clone(),
            },
            SyncConsumer { rx, close, handle },
        )
    }
}

/// The task half of an [`AsyncToSyncStream`].
pub struct AsyncProducer<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    close: Arc<CloseSlot>,
}

impl<T> AsyncProducer<T> {
    /// Suspends the task until a slot is free or the stream is closed.
    pub async fn aput(&self, item: T) -> Result<(), StreamError> {
        let tx = {
            let guard = self.tx.lock().unwrap();
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(eof_or_closed(&self.close)),
            }
        };
        tx.send(item).await.map_err(|_| eof_or_closed(&self.close))
    }

    /// Idempotent.
    pub fn aclose(&self) {
        self.close.close(None);
        self.tx.lock().unwrap().take();
    }

    /// Idempotent (first caller wins).
    pub fn aclose_with_error(&self, err: AdapterError) {
        self.close.close(Some(err));
        self.tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

/// The blocking-thread half of an [`AsyncToSyncStream`].
pub struct SyncConsumer<T> {
    rx: mpsc::Receiver<T>,
    close: Arc<CloseSlot>,
    handle: Handle,
}

impl<T> SyncConsumer<T> {
    /// Blocks the calling thread. With `timeout = None`, blocks
    /// indefinitely until an item arrives or the stream closes. With a
    /// timeout, returns [`StreamError::Timeout`] if nothing arrives in
    /// time. Must be called from a context where blocking is acceptable
    /// (never from an async task).
    pub fn get(&mut self, timeout: Option<Duration>) -> Result<T, StreamError> {
        match timeout {
            None => match self.rx.blocking_recv() {
                Some(item) => Ok(item),
                None => Err(eof_or_closed(&self.close)),
            },
            Some(duration) => {
                let recv = self.rx.recv();
                match self.handle.block_on(tokio::time::timeout(duration, recv)) {
                    Ok(Some(item)) => Ok(item),
                    Ok(None) => Err(eof_or_closed(&self.close)),
                    Err(_elapsed) => Err(StreamError::Timeout),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn sync_to_async_round_trip() {
        let (producer, mut consumer) = SyncToAsyncStream::channel::<i32>(2);
        let handle = thread::spawn(move || {
            producer.put(1).unwrap();
            producer.put(2).unwrap();
            producer.close();
        });
        assert_eq!(consumer.aget().await.unwrap(), 1);
        assert_eq!(consumer.aget().await.unwrap(), 2);
        assert!(matches!(consumer.aget().await, Err(StreamError::Eof)));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn sync_to_async_close_with_error_delivered_once() {
        let (producer, mut consumer) = SyncToAsyncStream::channel::<i32>(1);
        producer.close_with_error(AdapterError::Disconnect);
        match consumer.aget().await {
            Err(StreamError::Closed(AdapterError::Disconnect)) => {}
            other => panic!("expected Closed(Disconnect), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_to_sync_round_trip() {
        let handle = Handle::current();
        let (producer, mut consumer) = AsyncToSyncStream::channel::<i32>(2, handle);
        let consumer_handle = tokio::task::spawn_blocking(move || {
            let a = consumer.get(None).unwrap();
            let b = consumer.get(None).unwrap();
            let eof = consumer.get(None);
            (a, b, eof.is_err())
        });
        producer.aput(10).await.unwrap();
        producer.aput(20).await.unwrap();
        producer.aclose();
        let (a, b, saw_eof) = consumer_handle.await.unwrap();
        assert_eq!((a, b, saw_eof), (10, 20, true));
    }

    #[tokio::test]
    async fn async_to_sync_get_times_out() {
        let handle = Handle::current();
        let (_producer, mut consumer) = AsyncToSyncStream::channel::<i32>(1, handle);
        let result = tokio::task::spawn_blocking(move || {
            consumer.get(Some(StdDuration::from_millis(20)))
        })
        .await
        .unwrap();
        assert!(matches!(result, Err(StreamError::Timeout)));
    }

    #[tokio::test]
    async fn idempotent_close_is_a_no_op() {
        let (producer, mut consumer) = SyncToAsyncStream::channel::<i32>(1);
        producer.close_with_error(AdapterError::Disconnect);
        producer.close_with_error(AdapterError::Timeout); // ignored, first wins
        match consumer.aget().await {
            Err(StreamError::Closed(AdapterError::Disconnect)) => {}
            other => panic!("expected the first close's error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backpressure_blocks_producer_until_drained() {
        // capacity 1: second put must wait for the first to be drained.
        let (producer, mut consumer) = SyncToAsyncStream::channel::<i32>(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_writer = order.clone();
        let handle = thread::spawn(move || {
            producer.put(1).unwrap();
            order_writer.lock().unwrap().push("put-1");
            producer.put(2).unwrap();
            order_writer.lock().unwrap().push("put-2");
        });
        // give the producer thread a moment to fill the one slot and block
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(*order.lock().unwrap(), vec!["put-1"]);
        assert_eq!(consumer.aget().await.unwrap(), 1);
        assert_eq!(consumer.aget().await.unwrap(), 2);
        handle.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["put-1", "put-2"]);
    }
}
