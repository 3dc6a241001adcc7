//! # dbot-core
//!
//! Core types and traits shared by the bot host: [`Bot`], [`BotClient`], [`Handler`], message and
//! user types. Transport-agnostic; implemented by dbot-telegram and driven by dbot-host.

pub mod bot;
pub mod client;
pub mod error;
pub mod types;

pub use bot::{parse_message_id, Bot};
pub use client::{BotClient, ClientFactory, ErrorHandler};
pub use error::{DbotError, Result};
pub use types::{
    BotIdentity, Chat, Handler, HandlerResponse, Message, ToCoreMessage, ToCoreUser, User,
};
