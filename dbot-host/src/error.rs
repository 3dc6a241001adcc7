//! Host error taxonomy.
//!
//! Every variant is local to the operation that produced it: none of them poisons the manager.

use dbot_core::DbotError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    /// Malformed settings or arguments on construction or edit.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("App with ID {0} not found!")]
    NotFound(String),

    #[error("Application {0} already loaded")]
    AlreadyLoaded(String),

    /// A transition was requested out of order (e.g. start before initialize).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Failure reported by the underlying bot client.
    #[error("Resource error: {0}")]
    Resource(String),

    /// No module is registered under the reference.
    #[error("Cannot load module '{0}'")]
    Load(String),

    #[error("Cannot import name '{name}' from '{module}'")]
    Import { name: String, module: String },

    /// Raised by an application's lifecycle hook or constructor.
    #[error("Hook error: {0}")]
    Hook(#[from] anyhow::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DbotError> for HostError {
    fn from(error: DbotError) -> Self {
        match error {
            DbotError::NotInitialized(message) => HostError::Precondition(message),
            other => HostError::Resource(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
