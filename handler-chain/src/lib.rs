//! # Handler chain
//!
//! Routes each incoming message through the handlers an application registered with its client.
//! All `before` callbacks run in order (any `false` stops the chain), then `handle` runs until a
//! handler returns Stop or Reply, then `after` callbacks run in reverse order.

use dbot_core::{Handler, HandlerResponse, Message, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ordered set of handlers belonging to one application.
#[derive(Clone, Default)]
pub struct HandlerChain {
    app_id: String,
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    /// Creates an empty chain; `app_id` tags every log line of this chain.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            handlers: Vec::new(),
        }
    }

    /// Appends a handler (builder style).
    pub fn add_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.push(handler);
        self
    }

    /// Appends a handler in place.
    pub fn push(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the three phases for `message` and returns the first Stop or Reply, or Continue.
    #[instrument(skip(self, message), fields(app_id = %self.app_id))]
    pub async fn handle(&self, message: &Message) -> Result<HandlerResponse> {
        debug!(
            user_id = message.user.id,
            chat_id = message.chat.id,
            message_id = %message.id,
            handlers = self.handlers.len(),
            "handler chain started"
        );

        for handler in &self.handlers {
            if !handler.before(message).await? {
                debug!(
                    handler = %std::any::type_name_of_val(handler.as_ref()),
                    "before returned false, chain stopped"
                );
                return Ok(HandlerResponse::Stop);
            }
        }

        let mut final_response = HandlerResponse::Continue;
        for handler in &self.handlers {
            let response = handler.handle(message).await?;
            debug!(
                handler = %std::any::type_name_of_val(handler.as_ref()),
                response = ?response,
                "handler processed"
            );
            match response {
                HandlerResponse::Stop | HandlerResponse::Reply(_) => {
                    final_response = response;
                    break;
                }
                HandlerResponse::Continue | HandlerResponse::Ignore => continue,
            }
        }

        for handler in self.handlers.iter().rev() {
            handler.after(message, &final_response).await?;
        }

        Ok(final_response)
    }
}

// Integration tests live in tests/handler_chain_test.rs
