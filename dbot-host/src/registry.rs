//! Registry: resolves `path[:TypeName]` module references to application kinds.
//!
//! A module is produced by a provider function registered under a path. The first resolve of a
//! path loads it; every later resolve reloads it (the provider runs again and the cached unit is
//! replaced with the next generation), so a reloaded application never reuses a stale kind.
//! Code itself is compiled in: picking up source changes still needs a process restart.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::application::{AppDefinition, ApplicationKind, TypedKind};
use crate::error::{HostError, Result};

/// Type name used when a reference carries none; maps to the module's default export.
pub const DEFAULT_TYPE_NAME: &str = "Application";

const MODULE_PREFIX: &str = "apps.";

/// A named set of application kinds with an optional default export.
#[derive(Default)]
pub struct Module {
    kinds: HashMap<String, Arc<dyn ApplicationKind>>,
    default: Option<String>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `D` under its type name.
    pub fn with<D: AppDefinition>(mut self) -> Self {
        self.kinds
            .insert(D::TYPE_NAME.to_string(), Arc::new(TypedKind::<D>::new()));
        self
    }

    /// Exports `D` and makes it the module's default export.
    pub fn with_default<D: AppDefinition>(mut self) -> Self {
        self = self.with::<D>();
        self.default = Some(D::TYPE_NAME.to_string());
        self
    }

    pub fn kind(&self, name: &str) -> Option<Arc<dyn ApplicationKind>> {
        let name = match (name, &self.default) {
            (DEFAULT_TYPE_NAME, Some(default)) => default.as_str(),
            _ => name,
        };
        self.kinds.get(name).cloned()
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

type ModuleProvider = Arc<dyn Fn() -> Module + Send + Sync>;

/// A cached module and how many times it has been loaded.
pub struct LoadedModule {
    pub path: String,
    pub generation: u64,
    pub module: Module,
}

#[derive(Default)]
pub struct Registry {
    providers: HashMap<String, ModuleProvider>,
    cache: RwLock<HashMap<String, Arc<LoadedModule>>>,
}

/// `echo` → `apps.echo`; dotted paths are kept as they are.
pub fn normalize_module_path(path: &str) -> String {
    let path = path.trim();
    if path.contains('.') {
        path.to_string()
    } else {
        format!("{}{}", MODULE_PREFIX, path)
    }
}

/// Splits `path[:TypeName]` into the normalized path and the type name.
pub fn parse_reference(reference: &str) -> (String, String) {
    match reference.split_once(':') {
        Some((path, name)) if !name.trim().is_empty() => {
            (normalize_module_path(path), name.trim().to_string())
        }
        Some((path, _)) => (normalize_module_path(path), DEFAULT_TYPE_NAME.to_string()),
        None => (
            normalize_module_path(reference),
            DEFAULT_TYPE_NAME.to_string(),
        ),
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the provider for `path` (normalized).
    pub fn register<F>(&mut self, path: &str, provider: F) -> &mut Self
    where
        F: Fn() -> Module + Send + Sync + 'static,
    {
        self.providers
            .insert(normalize_module_path(path), Arc::new(provider));
        self
    }

    pub fn module_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Loads `path` the first time; afterwards returns the cached unit, or a fresh generation
    /// when `force_reload` is set.
    pub fn load_module(&self, path: &str, force_reload: bool) -> Result<Arc<LoadedModule>> {
        let path = normalize_module_path(path);
        let provider = self
            .providers
            .get(&path)
            .ok_or_else(|| HostError::Load(path.clone()))?;

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let generation = match cache.get(&path) {
            Some(loaded) if !force_reload => return Ok(loaded.clone()),
            Some(loaded) => {
                info!(module = %path, generation = loaded.generation + 1, "Reloading");
                loaded.generation + 1
            }
            None => {
                info!(module = %path, "Loading");
                1
            }
        };

        let loaded = Arc::new(LoadedModule {
            path: path.clone(),
            generation,
            module: provider(),
        });
        cache.insert(path, loaded.clone());
        Ok(loaded)
    }

    /// Resolves a reference, reloading its module when it was loaded before.
    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn ApplicationKind>> {
        let (path, name) = parse_reference(reference);
        let loaded = self.load_module(&path, true)?;
        loaded.module.kind(&name).ok_or(HostError::Import {
            name,
            module: loaded.path.clone(),
        })
    }

    /// Current generation of a cached module; None when never loaded.
    pub fn generation(&self, path: &str) -> Option<u64> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_module_path(path))
            .map(|loaded| loaded.generation)
    }
}
