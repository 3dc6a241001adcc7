//! # dbot-telegram
//!
//! Telegram transport layer: adapters, [`dbot_core::Bot`] and [`dbot_core::BotClient`]
//! implementations over teloxide, and the connection config shared by all clients of a host.
//! No lifecycle policy lives here; dbot-host drives the clients.

mod adapters;
mod bot_adapter;
mod client;
mod config;

pub use adapters::{identity_of, TelegramMessageWrapper, TelegramUserWrapper};
pub use bot_adapter::TelegramBotAdapter;
pub use client::{TelegramClient, TelegramClientFactory};
pub use config::TelegramConfig;
