//! Lifecycle manager: owns the live application set and drives every transition on it.
//!
//! Bulk operations fan out concurrently with `join_all` and return one result per target; a
//! failing target never aborts its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use dbot_core::ClientFactory;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::application::Application;
use crate::config::ConfigStore;
use crate::error::{HostError, Result};
use crate::registry::Registry;

/// One result per target id, in target order.
pub type BulkResult<T> = Vec<(String, Result<T>)>;

pub struct LifecycleManager {
    registry: Arc<Registry>,
    store: Arc<dyn ConfigStore>,
    clients: Arc<dyn ClientFactory>,
    apps: RwLock<HashMap<String, Arc<Application>>>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn ConfigStore>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            registry,
            store,
            clients,
            apps: RwLock::new(HashMap::new()),
        }
    }

    // ====
    // READ
    // ====

    pub async fn get(&self, id: &str) -> Option<Arc<Application>> {
        self.apps.read().await.get(id).cloned()
    }

    /// Like [`get`](Self::get) but `NotFound` for an unknown id.
    pub async fn app(&self, id: &str) -> Result<Arc<Application>> {
        self.get(id)
            .await
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    /// Snapshot of the live set, sorted by id.
    pub async fn apps(&self) -> Vec<Arc<Application>> {
        let mut apps: Vec<_> = self.apps.read().await.values().cloned().collect();
        apps.sort_by(|a, b| a.id().cmp(b.id()));
        apps
    }

    pub async fn len(&self) -> usize {
        self.apps.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.apps.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.apps.read().await.contains_key(id)
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.apps.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn config_ids(&self) -> Vec<String> {
        self.store
            .app_configs()
            .await
            .into_iter()
            .map(|app| app.id)
            .collect()
    }

    async fn targets(&self, ids: Option<&[String]>) -> Vec<String> {
        match ids {
            Some(ids) => ids.to_vec(),
            None => self.live_ids().await,
        }
    }

    // ======
    // PER ID
    // ======

    /// Resolves and constructs the application for `id`; it is not initialized.
    #[instrument(skip(self))]
    pub async fn load(&self, id: &str) -> Result<Arc<Application>> {
        if self.contains(id).await {
            return Err(HostError::AlreadyLoaded(id.to_string()));
        }
        let app = self.build(id).await?;
        self.insert(app).await
    }

    /// Resolves the module and constructs a detached instance from the stored config.
    async fn build(&self, id: &str) -> Result<Arc<Application>> {
        let config = self
            .store
            .app_config(id)
            .await
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;

        let kind = self.registry.resolve(&config.module)?;
        Ok(Arc::new(Application::new(kind, &config, self.clients.as_ref())?))
    }

    async fn insert(&self, app: Arc<Application>) -> Result<Arc<Application>> {
        let mut apps = self.apps.write().await;
        if apps.contains_key(app.id()) {
            return Err(HostError::AlreadyLoaded(app.id().to_string()));
        }
        apps.insert(app.id().to_string(), app.clone());
        info!(app_id = %app.id(), name = %app.name(), "Loaded");
        Ok(app)
    }

    #[instrument(skip(self))]
    pub async fn initialize(&self, id: &str) -> Result<()> {
        self.app(id).await?.initialize().await
    }

    #[instrument(skip(self))]
    pub async fn start(&self, id: &str) -> Result<()> {
        self.app(id).await?.start().await
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<()> {
        self.app(id).await?.pause().await
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self, id: &str) -> Result<()> {
        self.app(id).await?.shutdown().await
    }

    /// Shuts the application down and drops it from the live set.
    #[instrument(skip(self))]
    pub async fn destroy(&self, id: &str) -> Result<String> {
        let app = self.app(id).await?;
        app.shutdown().await?;
        self.apps.write().await.remove(id);
        info!(app_id = %id, "Destroyed");
        Ok(id.to_string())
    }

    /// Rebuilds one application from a freshly resolved kind, restarting it if it was running.
    ///
    /// The replacement is constructed before the live instance is destroyed, so a module or
    /// argument error leaves the old instance in place. A failure after that point (initialize or
    /// start of the replacement) leaves the replacement live in whatever state it reached.
    #[instrument(skip(self))]
    pub async fn reload(&self, id: &str, update_config: bool) -> Result<Arc<Application>> {
        if update_config {
            self.store.reload_app_config(id).await?;
        }
        let was_running = self.app(id).await?.running();

        let app = self.build(id).await?;
        self.destroy(id).await?;
        let app = self.insert(app).await?;
        app.initialize().await?;
        if was_running {
            app.start().await?;
        }
        info!(app_id = %id, running = app.running(), "Reloaded");
        Ok(app)
    }

    // ====
    // BULK
    // ====

    /// `None` loads every configured id.
    pub async fn load_apps(&self, ids: Option<&[String]>) -> BulkResult<Arc<Application>> {
        let ids = match ids {
            Some(ids) => ids.to_vec(),
            None => self.config_ids().await,
        };
        join_all(ids.into_iter().map(|id| async move {
            let result = self.load(&id).await;
            (id, result)
        }))
        .await
    }

    pub async fn initialize_apps(&self, ids: Option<&[String]>) -> BulkResult<()> {
        let ids = self.targets(ids).await;
        join_all(ids.into_iter().map(|id| async move {
            let result = self.initialize(&id).await;
            (id, result)
        }))
        .await
    }

    pub async fn start_apps(&self, ids: Option<&[String]>) -> BulkResult<()> {
        let ids = self.targets(ids).await;
        join_all(ids.into_iter().map(|id| async move {
            let result = self.start(&id).await;
            (id, result)
        }))
        .await
    }

    pub async fn pause_apps(&self, ids: Option<&[String]>) -> BulkResult<()> {
        let ids = self.targets(ids).await;
        join_all(ids.into_iter().map(|id| async move {
            let result = self.pause(&id).await;
            (id, result)
        }))
        .await
    }

    pub async fn shutdown_apps(&self, ids: Option<&[String]>) -> BulkResult<()> {
        let ids = self.targets(ids).await;
        join_all(ids.into_iter().map(|id| async move {
            let result = self.shutdown(&id).await;
            (id, result)
        }))
        .await
    }

    pub async fn destroy_apps(&self, ids: Option<&[String]>) -> BulkResult<String> {
        let ids = self.targets(ids).await;
        join_all(ids.into_iter().map(|id| async move {
            let result = self.destroy(&id).await;
            (id, result)
        }))
        .await
    }

    /// `Some(ids)` reloads each id from its current config. `None` rebuilds everything from a
    /// fresh read of the store, so added and removed entries are picked up too.
    #[instrument(skip(self))]
    pub async fn reload_apps(&self, ids: Option<&[String]>) -> Result<BulkResult<()>> {
        if let Some(ids) = ids {
            return Ok(join_all(ids.iter().map(|id| async move {
                let result = self.reload(id, false).await.map(|_| ());
                (id.clone(), result)
            }))
            .await);
        }

        let was_running: HashMap<String, bool> = self
            .apps
            .read()
            .await
            .iter()
            .map(|(id, app)| (id.clone(), app.running()))
            .collect();

        for (id, result) in self.destroy_apps(None).await {
            if let Err(e) = result {
                warn!(app_id = %id, error = %e, "Destroy failed during full reload");
            }
        }

        self.store.reload().await?;
        let configs = self.store.app_configs().await;

        let was_running = &was_running;
        Ok(join_all(configs.into_iter().map(|config| async move {
            let start = was_running
                .get(&config.id)
                .copied()
                .unwrap_or(config.auto_start);
            let result = self.bring_up(&config.id, start).await;
            (config.id, result)
        }))
        .await)
    }

    /// Loads every configured application, initializes it and starts the `auto_start` ones.
    /// The result per id tells whether it was started.
    #[instrument(skip(self))]
    pub async fn boot(&self) -> BulkResult<bool> {
        let configs = self.store.app_configs().await;
        let results = join_all(configs.into_iter().map(|config| async move {
            let result = self
                .bring_up(&config.id, config.auto_start)
                .await
                .map(|_| config.auto_start);
            (config.id, result)
        }))
        .await;

        for (id, result) in &results {
            match result {
                Ok(true) => {
                    if let Some(app) = self.get(id).await {
                        info!("{} auto started", app.name());
                    }
                }
                Ok(false) => {}
                Err(e) => error!(app_id = %id, error = %e, "Failed to boot application"),
            }
        }
        results
    }

    async fn bring_up(&self, id: &str, start: bool) -> Result<()> {
        let app = self.load(id).await?;
        app.initialize().await?;
        if start {
            app.start().await?;
        }
        Ok(())
    }
}
