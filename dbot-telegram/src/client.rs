//! [`BotClient`] over teloxide: `getMe` on initialize, a long-polling dispatcher while started.
//!
//! Each incoming text message is converted to a core [`dbot_core::Message`] and routed through the
//! application's [`HandlerChain`]. Handler errors go to the installed [`ErrorHandler`], or are logged.

use std::sync::Arc;

use async_trait::async_trait;
use dbot_core::{
    Bot as CoreBot, BotClient, BotIdentity, ClientFactory, DbotError, ErrorHandler, Handler,
    Result, ToCoreMessage,
};
use handler_chain::HandlerChain;
use teloxide::dispatching::{Dispatcher, ShutdownToken, UpdateFilterExt};
use teloxide::requests::Requester;
use teloxide::types::Update;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{identity_of, TelegramMessageWrapper};
use crate::bot_adapter::TelegramBotAdapter;
use crate::config::TelegramConfig;

/// A running dispatcher: its shutdown token and the task driving it.
struct Polling {
    token: ShutdownToken,
    task: JoinHandle<()>,
}

pub struct TelegramClient {
    app_id: String,
    bot: teloxide::Bot,
    chain: HandlerChain,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    identity: Option<BotIdentity>,
    initialized: bool,
    polling: Option<Polling>,
}

impl TelegramClient {
    pub fn new(app_id: impl Into<String>, bot: teloxide::Bot) -> Self {
        let app_id = app_id.into();
        Self {
            chain: HandlerChain::new(app_id.clone()),
            app_id,
            bot,
            error_handler: None,
            identity: None,
            initialized: false,
            polling: None,
        }
    }

    async fn fetch_identity(&self) -> Result<BotIdentity> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| DbotError::Bot(e.to_string()))?;
        Ok(identity_of(&me.user))
    }
}

#[async_trait]
impl BotClient for TelegramClient {
    fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.chain.push(handler);
    }

    fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.error_handler = Some(handler);
    }

    fn sender(&self) -> Arc<dyn CoreBot> {
        Arc::new(TelegramBotAdapter::new(self.bot.clone()))
    }

    #[instrument(skip(self), fields(app_id = %self.app_id))]
    async fn initialize(&mut self) -> Result<()> {
        let identity = self.fetch_identity().await?;
        info!(bot_id = identity.id, bot_name = %identity.name(), "Telegram client initialized");
        self.identity = Some(identity);
        self.initialized = true;
        Ok(())
    }

    #[instrument(skip(self), fields(app_id = %self.app_id))]
    async fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(DbotError::NotInitialized(
                "Trying to start bot before initialisation".to_string(),
            ));
        }
        if self.polling.is_some() {
            debug!("Dispatcher already polling");
            return Ok(());
        }

        let chain = self.chain.clone();
        let error_handler = self.error_handler.clone();
        let app_id = self.app_id.clone();
        let handler = Update::filter_message().endpoint(move |msg: teloxide::types::Message| {
            let chain = chain.clone();
            let error_handler = error_handler.clone();
            let app_id = app_id.clone();
            async move {
                if msg.text().is_some() {
                    let core_msg = TelegramMessageWrapper(&msg).to_core();
                    info!(
                        app_id = %app_id,
                        user_id = core_msg.user.id,
                        chat_id = core_msg.chat.id,
                        "Received message"
                    );
                    if let Err(e) = chain.handle(&core_msg).await {
                        match &error_handler {
                            Some(handler) => handler.handle_error(&e).await,
                            None => error!(app_id = %app_id, error = %e, "Handler chain failed"),
                        }
                    }
                }
                teloxide::respond(())
            }
        });

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler).build();
        let token = dispatcher.shutdown_token();
        let task = tokio::spawn(async move { dispatcher.dispatch().await });
        self.polling = Some(Polling { token, task });
        info!(handlers = self.chain.len(), "Polling started");
        Ok(())
    }

    #[instrument(skip(self), fields(app_id = %self.app_id))]
    async fn stop(&mut self) -> Result<()> {
        let Some(polling) = self.polling.take() else {
            return Ok(());
        };
        match polling.token.shutdown() {
            Ok(done) => {
                done.await;
                if let Err(e) = polling.task.await {
                    warn!(error = %e, "Dispatcher task ended abnormally");
                }
            }
            // The dispatcher has not begun polling yet; nothing to drain.
            Err(_) => polling.task.abort(),
        }
        info!("Polling stopped");
        Ok(())
    }

    #[instrument(skip(self), fields(app_id = %self.app_id))]
    async fn shutdown(&mut self) -> Result<()> {
        self.stop().await?;
        self.initialized = false;
        Ok(())
    }

    async fn identity(&self) -> Result<BotIdentity> {
        match &self.identity {
            Some(identity) => Ok(identity.clone()),
            None => self.fetch_identity().await,
        }
    }
}

/// Builds a [`TelegramClient`] per application from the shared [`TelegramConfig`].
#[derive(Debug, Clone, Default)]
pub struct TelegramClientFactory {
    config: TelegramConfig,
}

impl TelegramClientFactory {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for TelegramClientFactory {
    fn create(&self, app_id: &str, token: &str) -> Box<dyn BotClient> {
        Box::new(TelegramClient::new(app_id, self.config.build_bot(token)))
    }
}
