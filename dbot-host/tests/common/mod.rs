//! Shared fixtures for dbot-host integration tests.
//!
//! [`MockClient`] counts every lifecycle call and never touches Telegram; a token starting with
//! `bad` makes `start` fail like a rejected credential. [`Tracer`] is a test application kind whose
//! `on_start` hook writes begin/end markers into [`journal`] after an optional delay.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbot_core::{
    Bot, BotClient, BotIdentity, Chat, ClientFactory, DbotError, ErrorHandler, Handler, Message,
};
use dbot_host::apps::builtin_registry;
use dbot_host::{
    AppDefinition, AppSettings, Behavior, EventSink, HookContext, JsonConfigStore,
    LifecycleManager, Module, Registry, Reply, Target,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

// ===========
// MOCK CLIENT
// ===========

/// Call counters of one client instance.
#[derive(Default)]
pub struct ClientStats {
    pub initialize: AtomicUsize,
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
    pub shutdown: AtomicUsize,
    pub handlers: AtomicUsize,
    pub error_handlers: AtomicUsize,
}

impl ClientStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct NullBot;

#[async_trait]
impl Bot for NullBot {
    async fn send_message(&self, _chat: &Chat, _text: &str) -> dbot_core::Result<()> {
        Ok(())
    }

    async fn reply_to(&self, _message: &Message, _text: &str) -> dbot_core::Result<()> {
        Ok(())
    }
}

pub struct MockClient {
    app_id: String,
    token: String,
    initialized: bool,
    stats: Arc<ClientStats>,
}

#[async_trait]
impl BotClient for MockClient {
    fn add_handler(&mut self, _handler: Arc<dyn Handler>) {
        self.stats.handlers.fetch_add(1, Ordering::SeqCst);
    }

    fn set_error_handler(&mut self, _handler: Arc<dyn ErrorHandler>) {
        self.stats.error_handlers.fetch_add(1, Ordering::SeqCst);
    }

    fn sender(&self) -> Arc<dyn Bot> {
        Arc::new(NullBot)
    }

    async fn initialize(&mut self) -> dbot_core::Result<()> {
        self.stats.initialize.fetch_add(1, Ordering::SeqCst);
        self.initialized = true;
        Ok(())
    }

    async fn start(&mut self) -> dbot_core::Result<()> {
        if !self.initialized {
            return Err(DbotError::NotInitialized(self.app_id.clone()));
        }
        if self.token.starts_with("bad") {
            return Err(DbotError::Bot("Unauthorized".to_string()));
        }
        self.stats.start.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> dbot_core::Result<()> {
        self.stats.stop.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&mut self) -> dbot_core::Result<()> {
        self.stats.shutdown.fetch_add(1, Ordering::SeqCst);
        self.initialized = false;
        Ok(())
    }

    async fn identity(&self) -> dbot_core::Result<BotIdentity> {
        let mut hasher = DefaultHasher::new();
        self.app_id.hash(&mut hasher);
        Ok(BotIdentity {
            id: (hasher.finish() % 1_000_000) as i64,
            username: Some(format!("{}_bot", self.app_id.replace('-', "_"))),
            first_name: self.app_id.clone(),
        })
    }
}

/// Hands out [`MockClient`]s and keeps the stats of every client it created.
#[derive(Default)]
pub struct MockClientFactory {
    created: Mutex<Vec<(String, Arc<ClientStats>)>>,
}

impl MockClientFactory {
    /// Stats of the most recent client created for `app_id`.
    pub fn stats(&self, app_id: &str) -> Arc<ClientStats> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == app_id)
            .map(|(_, stats)| stats.clone())
            .expect("no client created for app")
    }

    /// How many clients were created for `app_id`.
    pub fn created(&self, app_id: &str) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == app_id)
            .count()
    }
}

impl ClientFactory for MockClientFactory {
    fn create(&self, app_id: &str, token: &str) -> Box<dyn BotClient> {
        let stats = Arc::new(ClientStats::default());
        self.created
            .lock()
            .unwrap()
            .push((app_id.to_string(), stats.clone()));
        Box::new(MockClient {
            app_id: app_id.to_string(),
            token: token.to_string(),
            initialized: false,
            stats,
        })
    }
}

// ==========
// TRACER KIND
// ==========

static JOURNAL: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Journal lines written by apps whose id starts with `prefix`.
pub fn journal(prefix: &str) -> Vec<String> {
    JOURNAL
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.starts_with(prefix))
        .cloned()
        .collect()
}

fn default_label() -> String {
    "tracer".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TracerArguments {
    /// Name shown in replies
    #[serde(default = "default_label")]
    pub label: String,
    /// Delay inside on_start, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
    /// Numbers the tracer cares about
    #[serde(default)]
    pub numbers: Vec<i64>,
}

pub struct Tracer {
    arguments: TracerArguments,
}

struct TracerHandler;

#[async_trait]
impl Handler for TracerHandler {}

#[async_trait]
impl Behavior for Tracer {
    fn routes(&self, _sender: Arc<dyn Bot>) -> Vec<Arc<dyn Handler>> {
        vec![Arc::new(TracerHandler)]
    }

    async fn on_start(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        JOURNAL
            .lock()
            .unwrap()
            .push(format!("{}:start:begin", ctx.app_id()));
        tokio::time::sleep(Duration::from_millis(self.arguments.delay_ms)).await;
        JOURNAL
            .lock()
            .unwrap()
            .push(format!("{}:start:end", ctx.app_id()));
        Ok(())
    }
}

impl AppDefinition for Tracer {
    type Arguments = TracerArguments;

    const TYPE_NAME: &'static str = "Tracer";
    const BASES: &'static [&'static str] = &["Responder"];

    fn create(_settings: &AppSettings, arguments: TracerArguments) -> anyhow::Result<Self> {
        Ok(Self { arguments })
    }
}

pub fn test_registry() -> Registry {
    let mut registry = builtin_registry();
    registry.register("tracer", || Module::new().with_default::<Tracer>());
    registry
}

// ====
// SINK
// ====

#[derive(Default)]
pub struct RecordingSink {
    pub replies: Mutex<Vec<(Target, Reply)>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<(Target, Reply)> {
        std::mem::take(&mut *self.replies.lock().unwrap())
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, target: Target, reply: &Reply) -> dbot_host::Result<()> {
        self.replies.lock().unwrap().push((target, reply.clone()));
        Ok(())
    }
}

// =======
// FIXTURE
// =======

/// A manager over a temp-dir JSON config, mock clients and the test registry.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub store: Arc<JsonConfigStore>,
    pub clients: Arc<MockClientFactory>,
    pub manager: Arc<LifecycleManager>,
}

impl Fixture {
    pub async fn new(config: serde_json::Value) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let store = Arc::new(JsonConfigStore::open(&path).await.unwrap());
        let clients = Arc::new(MockClientFactory::default());
        let manager = Arc::new(LifecycleManager::new(
            Arc::new(test_registry()),
            store.clone(),
            clients.clone(),
        ));
        Self {
            dir,
            path,
            store,
            clients,
            manager,
        }
    }

    /// Overwrites the config file on disk without touching the in-memory store.
    pub fn rewrite(&self, config: serde_json::Value) {
        std::fs::write(&self.path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    }

    pub fn read_file(&self) -> String {
        std::fs::read_to_string(&self.path).unwrap()
    }
}

pub fn tracer(id: &str) -> serde_json::Value {
    serde_json::json!({"id": id, "module": "tracer", "token": format!("{}:token", id)})
}
