//! Owns the background cooperative scheduler `EVT→SYNC` runs wrapped
//! applications on, or wraps a caller-supplied one.

use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

/// A handle to a single-threaded cooperative scheduler. Either started and
/// owned by this value (torn down on drop) or borrowed from the caller (in
/// which case this adapter never starts or stops it).
pub struct Scheduler {
    handle: Handle,
    owned: Option<OwnedScheduler>,
}

struct OwnedScheduler {
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts a dedicated background thread hosting a current-thread
    /// `tokio` runtime, and returns a handle to it. The thread runs until
    /// this value is dropped.
    pub fn start() -> std::io::Result<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let shutdown = CancellationToken::new();
        let thread_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("wsgi-asgi-bridge-scheduler".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(thread_shutdown.cancelled());
            })?;
        let handle = handle_rx
            .recv()
            .unwrap_or_else(|_| panic!("scheduler thread exited before reporting its handle"))?;
        Ok(Scheduler {
            handle,
            owned: Some(OwnedScheduler {
                shutdown,
                thread: Some(thread),
            }),
        })
    }

    /// Wraps a caller-supplied runtime handle. This `Scheduler` never
    /// starts or stops it; the caller owns its lifecycle.
    pub fn shared(handle: Handle) -> Self {
        Scheduler { handle, owned: None }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(owned) = self.owned.take() {
            owned.shutdown.cancel();
            if let Some(thread) = owned.thread {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_scheduler_runs_spawned_work() {
        let scheduler = Scheduler::start().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        scheduler.spawn(async move {
            tx.send(21 + 21).unwrap();
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), 42);
    }

    #[tokio::test]
    async fn shared_scheduler_uses_the_current_runtime() {
        let scheduler = Scheduler::shared(Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.spawn(async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }
}
