//! Bot client capability: the per-application resource a host drives through its lifecycle.
//!
//! A [`BotClient`] owns one bot account. It is initialized once (identity fetched, API ready),
//! then started and stopped any number of times (receiving updates), and finally shut down.
//! Incoming messages are routed to the [`Handler`]s registered with [`BotClient::add_handler`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::bot::Bot;
use crate::error::{DbotError, Result};
use crate::types::{BotIdentity, Handler};

/// Receives errors raised by handlers while the client is receiving updates.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, error: &DbotError);
}

#[async_trait]
pub trait BotClient: Send + Sync {
    /// Registers a handler for incoming messages. Takes effect on the next `start`.
    fn add_handler(&mut self, handler: Arc<dyn Handler>);

    /// Installs the handler that receives errors from message handlers.
    fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>);

    /// Send side of the client, for handlers that reply.
    fn sender(&self) -> Arc<dyn Bot>;

    /// Prepares the client for use (API reachable, identity known).
    async fn initialize(&mut self) -> Result<()>;

    /// Starts receiving updates. Fails with [`DbotError::NotInitialized`] before `initialize`.
    async fn start(&mut self) -> Result<()>;

    /// Stops receiving updates; pending updates are dropped.
    async fn stop(&mut self) -> Result<()>;

    /// Releases the client. It may be initialized again afterwards.
    async fn shutdown(&mut self) -> Result<()>;

    /// Identity of the bot account.
    async fn identity(&self) -> Result<BotIdentity>;
}

/// Creates one client per application from its credential.
pub trait ClientFactory: Send + Sync {
    fn create(&self, app_id: &str, token: &str) -> Box<dyn BotClient>;
}
