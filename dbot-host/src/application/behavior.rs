//! The extension seam of an application type.
//!
//! The lifecycle driver ([`super::Application`]) is fixed; a concrete application type supplies a
//! [`Behavior`] value (routes, error handler, four lifecycle hooks) plus its typed arguments.
//! [`AppDefinition`] ties the two together and [`TypedKind`] erases it into an
//! [`ApplicationKind`] that the registry can hand out by name.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dbot_core::{Bot, BotClient, ErrorHandler, Handler};
use schemars::gen::SchemaGenerator;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::arguments::{schema_defaults, Arguments};
use crate::config::ApplicationConfig;
use crate::error::{HostError, Result};

/// The application's own validated view of its [`ApplicationConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub id: String,
    pub token: String,
    pub auto_start: bool,
}

impl AppSettings {
    pub fn validate(config: &ApplicationConfig) -> Result<Self> {
        if config.id.is_empty() || config.id.chars().any(char::is_whitespace) {
            return Err(HostError::Validation(format!(
                "invalid application id '{}'",
                config.id
            )));
        }
        if config.token.trim().is_empty() {
            return Err(HostError::Validation(format!(
                "application {} has an empty token",
                config.id
            )));
        }
        Ok(Self {
            id: config.id.clone(),
            token: config.token.clone(),
            auto_start: config.auto_start,
        })
    }
}

/// What a hook may touch: the application id and its bot client.
pub struct HookContext<'a> {
    app_id: &'a str,
    client: &'a mut Box<dyn BotClient>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(app_id: &'a str, client: &'a mut Box<dyn BotClient>) -> Self {
        Self { app_id, client }
    }

    pub fn app_id(&self) -> &str {
        self.app_id
    }

    /// Registers a message handler; it is served from the next start on.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.client.add_handler(handler);
    }

    pub fn sender(&self) -> Arc<dyn Bot> {
        self.client.sender()
    }
}

/// Per-type customisation points. Every method has a no-op default.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Message handlers installed with the client once per instance lifetime.
    fn routes(&self, _sender: Arc<dyn Bot>) -> Vec<Arc<dyn Handler>> {
        Vec::new()
    }

    fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        None
    }

    /// After the client is initialized.
    async fn on_initialize(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// After the client started receiving updates.
    async fn on_start(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Before pausing; runs even when the application is not running.
    async fn on_pause(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Before the client is shut down.
    async fn on_shutdown(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A concrete application type.
pub trait AppDefinition: Behavior + Sized + 'static {
    type Arguments: Serialize + DeserializeOwned + JsonSchema + Send + Sync;

    const TYPE_NAME: &'static str;

    /// Framework-level ancestors shown next to the type name, e.g. `Echo[Responder]`.
    const BASES: &'static [&'static str] = &[];

    /// Rules the argument types cannot express; checked before any arguments are accepted.
    fn validate(_arguments: &Self::Arguments) -> anyhow::Result<()> {
        Ok(())
    }

    fn create(settings: &AppSettings, arguments: Self::Arguments) -> anyhow::Result<Self>;
}

/// Type-erased application type, as handed out by the registry.
pub trait ApplicationKind: Send + Sync {
    fn type_name(&self) -> &str;

    fn bases(&self) -> &[&'static str];

    /// JSON schema of the argument type.
    fn schema(&self) -> &RootSchema;

    fn defaults(&self) -> &Map<String, Value>;

    /// Validates raw arguments (`null` counts as `{}`) into a full argument set, type rules included.
    fn validate(&self, raw: &Value) -> Result<Arguments>;

    fn instantiate(&self, settings: &AppSettings, arguments: &Arguments)
        -> Result<Box<dyn Behavior>>;

    /// `TypeName` or `TypeName[Base, Other]`.
    fn display_name(&self) -> String {
        let bases = self.bases();
        if bases.is_empty() {
            self.type_name().to_string()
        } else {
            format!("{}[{}]", self.type_name(), bases.join(", "))
        }
    }
}

/// [`ApplicationKind`] for an [`AppDefinition`]; the schema is generated once per instance.
pub struct TypedKind<D> {
    schema: RootSchema,
    defaults: Map<String, Value>,
    _definition: PhantomData<fn() -> D>,
}

impl<D: AppDefinition> TypedKind<D> {
    pub fn new() -> Self {
        let schema = SchemaGenerator::default().into_root_schema_for::<D::Arguments>();
        let defaults = schema_defaults(&schema);
        Self {
            schema,
            defaults,
            _definition: PhantomData,
        }
    }

    fn typed(&self, raw: &Value) -> Result<D::Arguments> {
        let raw = match raw {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => raw.clone(),
            other => {
                return Err(HostError::Validation(format!(
                    "arguments must be an object, got {}",
                    other
                )))
            }
        };
        let typed: D::Arguments =
            serde_json::from_value(raw).map_err(|e| HostError::Validation(e.to_string()))?;
        D::validate(&typed).map_err(|e| HostError::Validation(e.to_string()))?;
        Ok(typed)
    }
}

impl<D: AppDefinition> Default for TypedKind<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: AppDefinition> ApplicationKind for TypedKind<D> {
    fn type_name(&self) -> &str {
        D::TYPE_NAME
    }

    fn bases(&self) -> &[&'static str] {
        D::BASES
    }

    fn schema(&self) -> &RootSchema {
        &self.schema
    }

    fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    fn validate(&self, raw: &Value) -> Result<Arguments> {
        let typed = self.typed(raw)?;
        match serde_json::to_value(&typed)? {
            Value::Object(values) => Ok(Arguments::from_values(values)),
            other => Err(HostError::Validation(format!(
                "{} arguments must serialize to an object, got {}",
                D::TYPE_NAME,
                other
            ))),
        }
    }

    fn instantiate(
        &self,
        settings: &AppSettings,
        arguments: &Arguments,
    ) -> Result<Box<dyn Behavior>> {
        let typed = self.typed(&arguments.to_value())?;
        let behavior = D::create(settings, typed)?;
        Ok(Box::new(behavior))
    }
}
