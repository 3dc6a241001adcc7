//! Application instance: one hosted bot and the state machine that drives it.
//!
//! ```text
//! Constructed --initialize--> Initialized --start--> Running
//!      ^                        |     ^                 |
//!      +-------shutdown---------+     +------pause------+
//! ```
//!
//! Transitions are serialised per instance by the client mutex. The state is readable at any
//! time without waiting for a transition in progress.

mod arguments;
mod behavior;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dbot_core::{BotClient, BotIdentity, ClientFactory};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub use arguments::{describe_fields, schema_defaults, Arguments, FieldInfo};
pub use behavior::{AppDefinition, AppSettings, ApplicationKind, Behavior, HookContext, TypedKind};

use crate::config::ApplicationConfig;
use crate::error::{HostError, Result};

/// Lifecycle state. `Running` implies initialized by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Constructed,
    Initialized,
    Running,
}

impl AppState {
    pub fn is_initialized(self) -> bool {
        !matches!(self, AppState::Constructed)
    }

    pub fn is_running(self) -> bool {
        matches!(self, AppState::Running)
    }
}

/// Short status of an application with its Telegram identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStatus {
    pub id: String,
    pub initialized: bool,
    pub running: bool,
    pub tg_id: i64,
    pub tg_link: Option<String>,
    pub tg_name: String,
}

/// Bot identity as shown in info records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotSummary {
    #[serde(flatten)]
    pub identity: BotIdentity,
    pub link: Option<String>,
}

/// Full info record of an application, as served to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppInfo {
    pub id: String,
    pub token: String,
    pub initialized: bool,
    pub running: bool,
    pub bot: Option<BotSummary>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub config: Map<String, Value>,
    pub fields: BTreeMap<String, FieldInfo>,
}

pub struct Application {
    settings: AppSettings,
    name: String,
    kind: Arc<dyn ApplicationKind>,
    arguments: Arguments,
    behavior: Box<dyn Behavior>,
    state: RwLock<AppState>,
    client: Mutex<Box<dyn BotClient>>,
    identity: RwLock<Option<BotIdentity>>,
    routes_installed: AtomicBool,
}

impl Application {
    /// Validates settings and arguments against `kind`, builds the behaviour, creates the client.
    pub fn new(
        kind: Arc<dyn ApplicationKind>,
        config: &ApplicationConfig,
        clients: &dyn ClientFactory,
    ) -> Result<Self> {
        let settings = AppSettings::validate(config)?;
        let arguments = kind
            .validate(&Value::Object(config.arguments.clone()))
            .map_err(|e| match e {
                HostError::Validation(msg) => {
                    HostError::Validation(format!("{}: {}", settings.id, msg))
                }
                other => other,
            })?;
        let behavior = kind.instantiate(&settings, &arguments)?;
        let client = clients.create(&settings.id, &settings.token);
        let name = format!("{}-{}", kind.type_name(), settings.id);

        Ok(Self {
            settings,
            name,
            kind,
            arguments,
            behavior,
            state: RwLock::new(AppState::Constructed),
            client: Mutex::new(client),
            identity: RwLock::new(None),
            routes_installed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    /// `TypeName-id`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn auto_start(&self) -> bool {
        self.settings.auto_start
    }

    pub fn kind(&self) -> &Arc<dyn ApplicationKind> {
        &self.kind
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn non_default_arguments(&self) -> Map<String, Value> {
        self.arguments.non_default(self.kind.defaults())
    }

    /// Validates `raw` against this application's own argument schema.
    pub fn validate_arguments(&self, raw: &Value) -> Result<Arguments> {
        self.kind.validate(raw)
    }

    pub fn state(&self) -> AppState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn initialized(&self) -> bool {
        self.state().is_initialized()
    }

    pub fn running(&self) -> bool {
        self.state().is_running()
    }

    fn set_state(&self, state: AppState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    // =========
    // LIFECYCLE
    // =========

    /// Installs routes (once per lifetime), initializes the client, then runs `on_initialize`.
    #[instrument(skip(self), fields(app_id = %self.settings.id))]
    pub async fn initialize(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        if self.initialized() {
            debug!("Already initialized");
            return Ok(());
        }

        if !self.routes_installed.swap(true, Ordering::SeqCst) {
            for handler in self.behavior.routes(client.sender()) {
                client.add_handler(handler);
            }
            if let Some(error_handler) = self.behavior.error_handler() {
                client.set_error_handler(error_handler);
            }
        }

        client.initialize().await?;
        self.set_state(AppState::Initialized);
        info!("Initialized");

        let mut ctx = HookContext::new(&self.settings.id, &mut client);
        self.behavior.on_initialize(&mut ctx).await?;
        Ok(())
    }

    /// Starts receiving updates, then runs `on_start`.
    #[instrument(skip(self), fields(app_id = %self.settings.id))]
    pub async fn start(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        if self.running() {
            info!("Already started");
            return Ok(());
        }
        if !self.initialized() {
            return Err(HostError::Precondition(format!(
                "Trying to start {} before initialisation",
                self.name
            )));
        }

        client.start().await?;
        self.set_state(AppState::Running);

        let mut ctx = HookContext::new(&self.settings.id, &mut client);
        self.behavior.on_start(&mut ctx).await?;
        info!("Started");
        Ok(())
    }

    /// Runs `on_pause`, then stops receiving updates if running.
    #[instrument(skip(self), fields(app_id = %self.settings.id))]
    pub async fn pause(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        self.pause_locked(&mut client).await
    }

    async fn pause_locked(&self, client: &mut Box<dyn BotClient>) -> Result<()> {
        {
            let mut ctx = HookContext::new(&self.settings.id, client);
            self.behavior.on_pause(&mut ctx).await?;
        }

        if self.running() {
            client.stop().await?;
            self.set_state(AppState::Initialized);
            info!("Paused");
        } else {
            debug!("Already paused");
        }
        Ok(())
    }

    /// Pauses if running, runs `on_shutdown`, then shuts the client down if initialized.
    #[instrument(skip(self), fields(app_id = %self.settings.id))]
    pub async fn shutdown(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        if self.running() {
            self.pause_locked(&mut client).await?;
        }

        {
            let mut ctx = HookContext::new(&self.settings.id, &mut client);
            self.behavior.on_shutdown(&mut ctx).await?;
        }

        if self.initialized() {
            client.shutdown().await?;
            self.set_state(AppState::Constructed);
            info!("Shutdown");
        }
        Ok(())
    }

    // ====
    // READ
    // ====

    /// Bot identity; queried from the client once and cached.
    pub async fn identity(&self) -> Result<BotIdentity> {
        let cached = self
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cached {
            Some(identity) => Ok(identity),
            None => self.refresh_identity().await,
        }
    }

    /// Re-queries the identity from the client and replaces the cached one.
    pub async fn refresh_identity(&self) -> Result<BotIdentity> {
        let identity = self.client.lock().await.identity().await?;
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        Ok(identity)
    }

    pub async fn status(&self) -> Result<AppStatus> {
        let identity = self.identity().await?;
        let state = self.state();
        Ok(AppStatus {
            id: self.id().to_string(),
            initialized: state.is_initialized(),
            running: state.is_running(),
            tg_id: identity.id,
            tg_link: identity.link(),
            tg_name: identity.name(),
        })
    }

    /// Info record; `bot` is None when the identity cannot be queried.
    pub async fn info(&self) -> AppInfo {
        let bot = match self.identity().await {
            Ok(identity) => Some(BotSummary {
                link: identity.link(),
                identity,
            }),
            Err(e) => {
                debug!(app_id = %self.id(), error = %e, "Bot identity unavailable");
                None
            }
        };
        let state = self.state();
        AppInfo {
            id: self.id().to_string(),
            token: self.settings.token.clone(),
            initialized: state.is_initialized(),
            running: state.is_running(),
            bot,
            type_name: self.kind.display_name(),
            config: self.non_default_arguments(),
            fields: describe_fields(self.kind.schema(), &self.arguments),
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
