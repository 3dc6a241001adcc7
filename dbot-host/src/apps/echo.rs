//! Echo application: answers every text message with the same text.

use std::sync::Arc;

use async_trait::async_trait;
use dbot_core::{Bot, Handler, HandlerResponse, Message};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::application::{AppDefinition, AppSettings, Behavior, HookContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EchoArguments {
    /// Text put in front of every echoed message
    #[serde(default)]
    pub prefix: String,
    /// Longest echo sent back, in characters
    pub max_length: usize,
    /// Quote the incoming message instead of sending a plain message
    #[serde(default)]
    pub reply: bool,
}

pub struct Echo {
    app_id: String,
    arguments: EchoArguments,
}

impl AppDefinition for Echo {
    type Arguments = EchoArguments;

    const TYPE_NAME: &'static str = "Echo";

    fn validate(arguments: &EchoArguments) -> anyhow::Result<()> {
        if arguments.max_length == 0 {
            anyhow::bail!("max_length must be positive");
        }
        Ok(())
    }

    fn create(settings: &AppSettings, arguments: EchoArguments) -> anyhow::Result<Self> {
        Ok(Self {
            app_id: settings.id.clone(),
            arguments,
        })
    }
}

#[async_trait]
impl Behavior for Echo {
    fn routes(&self, sender: Arc<dyn Bot>) -> Vec<Arc<dyn Handler>> {
        vec![Arc::new(EchoHandler::new(sender, self.arguments.clone()))]
    }

    async fn on_start(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        info!(app_id = %ctx.app_id(), "Echoing messages");
        Ok(())
    }

    async fn on_pause(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        debug!(app_id = %self.app_id, "Echo paused");
        Ok(())
    }
}

/// Sends `prefix + text`, cut at `max_length` characters.
pub struct EchoHandler {
    sender: Arc<dyn Bot>,
    arguments: EchoArguments,
}

impl EchoHandler {
    pub fn new(sender: Arc<dyn Bot>, arguments: EchoArguments) -> Self {
        Self { sender, arguments }
    }

    pub fn echo_text(&self, content: &str) -> String {
        format!("{}{}", self.arguments.prefix, content)
            .chars()
            .take(self.arguments.max_length)
            .collect()
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, message: &Message) -> dbot_core::Result<HandlerResponse> {
        if message.content.trim().is_empty() {
            return Ok(HandlerResponse::Ignore);
        }

        let text = self.echo_text(&message.content);
        if self.arguments.reply {
            self.sender.reply_to(message, &text).await?;
        } else {
            self.sender.send_message(&message.chat, &text).await?;
        }
        Ok(HandlerResponse::Reply(text))
    }
}
