//! Control plane: turns operator commands into lifecycle-manager calls and results into replies.
//!
//! Lifecycle-mutating commands run under one gate, so at most one of them touches the live set or
//! the config store at a time. Read-only commands never take the gate.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::application::{AppInfo, Application};
use crate::error::{HostError, Result};
use crate::manager::{BulkResult, LifecycleManager};

/// Journal entries kept by [`ControlPlane::recent_activity`].
pub const ACTIVITY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Warning,
}

/// Outbound event: `{event, status, message, data}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub event: String,
    pub status: Status,
    pub message: String,
    pub data: Value,
}

impl Reply {
    pub fn success(event: &str, message: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.to_string(),
            status: Status::Success,
            message: message.into(),
            data,
        }
    }

    pub fn warning(event: &str, message: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.to_string(),
            status: Status::Warning,
            message: message.into(),
            data,
        }
    }

    pub fn error(event: &str, message: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            status: Status::Error,
            message: message.into(),
            data: Value::Null,
        }
    }
}

/// Who receives a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Requester,
    Broadcast,
}

/// Transport that delivers replies and log events to operators.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, target: Target, reply: &Reply) -> Result<()>;
}

/// Inbound command as it arrives from a transport.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Request {
    pub event: String,
    #[serde(rename = "appId", default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

impl Request {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            ..Self::default()
        }
    }

    pub fn for_app(event: &str, app_id: &str) -> Self {
        Self {
            event: event.to_string(),
            app_id: Some(app_id.to_string()),
            config: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    AppsReload,
    AppsStart,
    AppsPause,
    AppReload { app_id: String },
    AppStart { app_id: String },
    AppPause { app_id: String },
    AppEdit { app_id: String, config: Option<Value> },
    AppSchema { app_id: String },
    AppsConfig,
    AppConfig { app_id: String },
    ServerShutdown,
}

impl Command {
    /// Parses a request; an unknown event or a missing `appId` yields the error reply to send.
    pub fn parse(request: &Request) -> std::result::Result<Self, Reply> {
        let app_id = |reply_event: &str| {
            request
                .app_id
                .clone()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Reply::error(reply_event, "\"appId\" not set!"))
        };

        let command = match request.event.as_str() {
            "connect" => Command::Connect,
            "apps.reload" => Command::AppsReload,
            "apps.start" => Command::AppsStart,
            "apps.pause" => Command::AppsPause,
            "app.reload" => Command::AppReload {
                app_id: app_id("app_reload")?,
            },
            "app.start" => Command::AppStart {
                app_id: app_id("app_start")?,
            },
            "app.pause" => Command::AppPause {
                app_id: app_id("app_pause")?,
            },
            "app.edit" => Command::AppEdit {
                app_id: app_id("app_edit")?,
                config: request.config.clone(),
            },
            "app.schema" => Command::AppSchema {
                app_id: app_id("app_schema")?,
            },
            "apps.config" => Command::AppsConfig,
            "app.config" => Command::AppConfig {
                app_id: app_id("single_app_config")?,
            },
            "server.shutdown" => Command::ServerShutdown,
            other => {
                return Err(Reply::error(other, format!("Unknown command '{}'", other)));
            }
        };
        Ok(command)
    }

    pub fn reply_event(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::AppsReload => "apps_reload",
            Command::AppsStart => "apps_start",
            Command::AppsPause => "apps_pause",
            Command::AppReload { .. } => "app_reload",
            Command::AppStart { .. } => "app_start",
            Command::AppPause { .. } => "app_pause",
            Command::AppEdit { .. } => "app_edit",
            Command::AppSchema { .. } => "app_schema",
            Command::AppsConfig => "all_app_configs",
            Command::AppConfig { .. } => "single_app_config",
            Command::ServerShutdown => "shutdown",
        }
    }

    /// Whether the command mutates the live set or the config store.
    pub fn is_gated(&self) -> bool {
        !matches!(
            self,
            Command::Connect
                | Command::AppSchema { .. }
                | Command::AppsConfig
                | Command::AppConfig { .. }
        )
    }
}

/// One handled command or boot auto-start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub text: String,
    pub status: Status,
    pub timestamp: i64,
}

type Outgoing = Vec<(Target, Reply)>;

pub struct ControlPlane {
    manager: Arc<LifecycleManager>,
    sink: Arc<dyn EventSink>,
    gate: Mutex<()>,
    activity: std::sync::Mutex<VecDeque<ActivityEntry>>,
    shutdown: CancellationToken,
}

impl ControlPlane {
    pub fn new(manager: Arc<LifecycleManager>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            manager,
            sink,
            gate: Mutex::new(()),
            activity: std::sync::Mutex::new(VecDeque::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Cancelled once `server.shutdown` has destroyed every application.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Journal of handled commands, oldest first; also sent with every `connect` reply.
    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn record(&self, text: String, status: Status) {
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        if activity.len() == ACTIVITY_LIMIT {
            activity.pop_front();
        }
        activity.push_back(ActivityEntry {
            text,
            status,
            timestamp: Utc::now().timestamp(),
        });
    }

    /// Boots every configured application under the gate and journals the outcome per app.
    pub async fn boot(&self) -> BulkResult<bool> {
        let results = {
            let _gate = self.gate.lock().await;
            self.manager.boot().await
        };
        for (id, result) in &results {
            match result {
                Ok(true) => self.record(format!("auto start - appId: {}", id), Status::Success),
                Ok(false) => {}
                Err(e) => self.record(format!("boot - appId: {} - {}", id, e), Status::Error),
            }
        }
        results
    }

    /// Handles one request and delivers every resulting reply through the sink.
    #[instrument(skip(self, request), fields(event = %request.event))]
    pub async fn handle(&self, request: Request) {
        info!(app_id = ?request.app_id, "Request received");
        let outgoing = match Command::parse(&request) {
            Ok(command) => self.execute(command).await,
            Err(reply) => vec![(Target::Requester, reply)],
        };

        let mut text = request.event.clone();
        if let Some(app_id) = &request.app_id {
            text = format!("{} - appId: {}", text, app_id);
        }
        if let Some((_, summary)) = outgoing.last() {
            if summary.status == Status::Error {
                text = format!("{} - {}", text, summary.message);
            }
            self.record(text, summary.status);
        }

        for (target, reply) in &outgoing {
            if reply.status == Status::Error {
                warn!(event = %reply.event, "{}", reply.message);
            }
            if let Err(e) = self.sink.emit(*target, reply).await {
                warn!(event = %reply.event, error = %e, "Failed to deliver reply");
            }
        }
    }

    /// Runs a parsed command and returns its replies in delivery order.
    pub async fn execute(&self, command: Command) -> Outgoing {
        let event = command.reply_event();
        match command {
            Command::Connect => vec![(
                Target::Requester,
                Reply::success(
                    event,
                    "Connection established",
                    json!({
                        "apps_update": self.apps_info().await,
                        "activity": self.recent_activity(),
                    }),
                ),
            )],
            Command::AppsReload => {
                let results = {
                    let _gate = self.gate.lock().await;
                    self.manager.reload_apps(None).await
                };
                match results {
                    Ok(results) => self.bulk_replies(event, results, "Apps reloaded").await,
                    Err(e) => vec![(Target::Requester, Reply::error(event, e.to_string()))],
                }
            }
            Command::AppsStart => {
                let results = {
                    let _gate = self.gate.lock().await;
                    self.manager.start_apps(None).await
                };
                self.bulk_replies(event, results, "Apps started").await
            }
            Command::AppsPause => {
                let results = {
                    let _gate = self.gate.lock().await;
                    self.manager.pause_apps(None).await
                };
                self.bulk_replies(event, results, "Apps paused").await
            }
            Command::AppReload { app_id } => {
                let result = {
                    let _gate = self.gate.lock().await;
                    self.manager.reload(&app_id, true).await
                };
                match result {
                    Ok(app) => self.app_replied(event, format!("App {} reloaded", app_id), &app).await,
                    Err(e) => vec![(Target::Requester, Reply::error(event, e.to_string()))],
                }
            }
            Command::AppStart { app_id } => {
                let result = {
                    let _gate = self.gate.lock().await;
                    match self.manager.app(&app_id).await {
                        Ok(app) => app.start().await.map(|()| app),
                        Err(e) => Err(e),
                    }
                };
                match result {
                    Ok(app) => self.app_replied(event, format!("App {} started", app_id), &app).await,
                    Err(e) => vec![(Target::Requester, Reply::error(event, e.to_string()))],
                }
            }
            Command::AppPause { app_id } => {
                let result = {
                    let _gate = self.gate.lock().await;
                    match self.manager.app(&app_id).await {
                        Ok(app) => app.pause().await.map(|()| app),
                        Err(e) => Err(e),
                    }
                };
                match result {
                    Ok(app) => self.app_replied(event, format!("App {} paused", app_id), &app).await,
                    Err(e) => vec![(Target::Requester, Reply::error(event, e.to_string()))],
                }
            }
            Command::AppEdit { app_id, config } => self.edit(event, &app_id, config).await,
            Command::AppSchema { app_id } => {
                let app = match self.lookup(event, &app_id).await {
                    Ok(app) => app,
                    Err(reply) => return vec![(Target::Requester, reply)],
                };
                let reply = match serde_json::to_value(app.kind().schema()) {
                    Ok(schema) => Reply::success(
                        event,
                        format!("Got schema for {}", app_id),
                        json!({ "schema": schema }),
                    ),
                    Err(e) => Reply::error(event, e.to_string()),
                };
                vec![(Target::Requester, reply)]
            }
            Command::AppsConfig => vec![(
                Target::Requester,
                Reply::success(
                    event,
                    "All app info retrieved",
                    json!({ "apps_update": self.apps_info().await }),
                ),
            )],
            Command::AppConfig { app_id } => {
                let reply = match self.lookup(event, &app_id).await {
                    Ok(app) => Reply::success(
                        event,
                        "App info retrieved",
                        json!({ "app_update": app.info().await }),
                    ),
                    Err(reply) => reply,
                };
                vec![(Target::Requester, reply)]
            }
            Command::ServerShutdown => {
                let results = {
                    let _gate = self.gate.lock().await;
                    self.manager.destroy_apps(None).await
                };
                let outgoing = self.bulk_replies(event, results, "Server shutting down").await;
                self.shutdown.cancel();
                outgoing
            }
        }
    }

    /// Validates the new arguments, persists the non-default subset and reloads the app.
    ///
    /// The whole flow runs under the gate so it always sees the current instance.
    async fn edit(&self, event: &str, app_id: &str, config: Option<Value>) -> Outgoing {
        let Some(config) = config else {
            if let Err(reply) = self.lookup(event, app_id).await {
                return vec![(Target::Requester, reply)];
            }
            return vec![(Target::Requester, Reply::error(event, "\"config\" not set!"))];
        };

        let _gate = self.gate.lock().await;
        let app = match self.lookup(event, app_id).await {
            Ok(app) => app,
            Err(reply) => return vec![(Target::Requester, reply)],
        };
        let old_config = app.non_default_arguments();
        let parsed = match app.validate_arguments(&config) {
            Ok(parsed) => parsed,
            Err(HostError::Validation(message)) => {
                return vec![(
                    Target::Requester,
                    Reply::error(event, format!("Config validation error: {}", message)),
                )];
            }
            Err(e) => return vec![(Target::Requester, Reply::error(event, e.to_string()))],
        };
        if &parsed == app.arguments() {
            return vec![(
                Target::Broadcast,
                Reply::warning(event, "Nothing has changed", Value::Null),
            )];
        }

        match self
            .persist_and_reload(app_id, parsed.non_default(app.kind().defaults()))
            .await
        {
            Ok(app) => vec![(
                Target::Broadcast,
                Reply::success(
                    event,
                    format!("App {} edited and reloaded", app_id),
                    json!({
                        "app_update": app.info().await,
                        "new_config": app.non_default_arguments(),
                        "old_config": old_config,
                    }),
                ),
            )],
            Err(e) => vec![(Target::Requester, Reply::error(event, e.to_string()))],
        }
    }

    async fn persist_and_reload(
        &self,
        app_id: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Arc<Application>> {
        let store = self.manager.store();
        let mut record = store
            .app_config(app_id)
            .await
            .ok_or_else(|| HostError::NotFound(app_id.to_string()))?;
        record.arguments = arguments;
        store.set_app_config(record).await;
        store.persist().await?;
        self.manager.reload(app_id, true).await
    }

    async fn lookup(&self, event: &str, app_id: &str) -> std::result::Result<Arc<Application>, Reply> {
        self.manager
            .app(app_id)
            .await
            .map_err(|e| Reply::error(event, e.to_string()))
    }

    async fn apps_info(&self) -> Vec<AppInfo> {
        let apps = self.manager.apps().await;
        join_all(apps.iter().map(|app| app.info())).await
    }

    async fn app_replied(&self, event: &str, message: String, app: &Application) -> Outgoing {
        vec![(
            Target::Broadcast,
            Reply::success(event, message, json!({ "app_update": app.info().await })),
        )]
    }

    /// One error reply per failed target, then a summary: warning if anything failed.
    async fn bulk_replies<T>(&self, event: &str, results: BulkResult<T>, done: &str) -> Outgoing {
        let mut outgoing: Outgoing = results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .map(|(id, e)| (Target::Requester, Reply::error(event, format!("{}: {}", id, e))))
            .collect();

        let data = json!({ "apps_update": self.apps_info().await });
        let summary = if outgoing.is_empty() {
            Reply::success(event, done, data)
        } else {
            Reply::warning(
                event,
                format!("{} with {} failure(s)", done, outgoing.len()),
                data,
            )
        };
        outgoing.push((Target::Broadcast, summary));
        outgoing
    }
}
