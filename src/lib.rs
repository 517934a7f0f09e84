//! A bridge between two HTTP server-application contracts that differ in
//! their I/O discipline: a synchronous, iterator-driven contract (WSGI-
//! shaped, here called SYNC, where the app runs on a blocking thread and
//! exchanges bodies through blocking reads and a returned iterator) and an
//! event-driven, message-passing contract (ASGI-shaped, here called EVT,
//! where the app is a cooperatively scheduled task exchanging typed
//! messages over `receive`/`send`).
//!
//! The interesting engineering isn't the protocol surface — it's bridging
//! the two concurrency disciplines without buffering whole request or
//! response bodies in memory. [`streams`] provides the two bounded
//! primitives that make that possible; [`sync_to_evt`] and [`evt_to_sync`]
//! build the two adapter directions on top of them.
//!
//! This crate doesn't parse HTTP, speak TLS, or own a transport. It wraps
//! one side's application and presents it as the other side's calling
//! convention; plugging it into a real server is left to the caller (see
//! `demos/dadjoke` for one such wiring).

pub mod environ;
pub mod error;
pub mod evt_app;
pub mod evt_to_sync;
pub mod messages;
pub mod scheduler;
pub mod scope;
pub mod status;
pub mod streams;
pub mod sync_app;
pub mod sync_to_evt;
pub mod translate;

pub use environ::{Environ, WsgiErrors, WsgiInput};
pub use error::{AdapterError, BoxError, StreamError};
pub use evt_app::{EvtApp, ReceiveChannel, SendChannel};
pub use evt_to_sync::{EvtToSync, EvtToSyncConfig};
pub use messages::{EvtMessage, EvtResponseMessage};
pub use scheduler::Scheduler;
pub use scope::{Address, Scope, ScopeType};
pub use streams::{AsyncConsumer, AsyncProducer, AsyncToSyncStream, SyncConsumer, SyncProducer, SyncToAsyncStream};
pub use sync_app::{take_pending, BoxBodyIter, PendingSlot, ResponseStart, StartResponse, SyncApp};
pub use sync_to_evt::{SyncToEvt, SyncToEvtConfig};
