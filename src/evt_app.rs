//! The EVT-side calling convention: an application is an async task that
//! receives a [`Scope`] plus a `receive`/`send` pair of message channels.

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::messages::{EvtMessage, EvtResponseMessage};
use crate::scope::Scope;

/// The `receive` half of the EVT calling convention.
#[async_trait]
pub trait ReceiveChannel: Send {
    async fn receive(&mut self) -> Result<EvtMessage, AdapterError>;
}

/// The `send` half of the EVT calling convention.
#[async_trait]
pub trait SendChannel: Send {
    async fn send(&mut self, message: EvtResponseMessage) -> Result<(), AdapterError>;
}

/// An EVT application: `(scope, receive, send)`, cooperatively scheduled.
#[async_trait]
pub trait EvtApp: Send + Sync + 'static {
    async fn call(
        &self,
        scope: Scope,
        receive: &mut dyn ReceiveChannel,
        send: &mut dyn SendChannel,
    ) -> Result<(), AdapterError>;
}
