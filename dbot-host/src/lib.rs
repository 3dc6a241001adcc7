//! # dbot-host
//!
//! Runs several bot applications in one process. The [`LifecycleManager`] owns the live set and
//! drives each [`Application`] through its state machine; the [`Registry`] resolves module
//! references to application kinds; the [`ConfigStore`] keeps the durable config; the
//! [`ControlPlane`] exposes all of it to operators, serialising mutating commands behind one gate.

pub mod application;
pub mod apps;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod log_forward;
pub mod logger;
pub mod manager;
pub mod registry;
pub mod stdio;

pub use application::{
    AppDefinition, AppInfo, AppSettings, AppState, AppStatus, Application, ApplicationKind,
    Arguments, Behavior, HookContext,
};
pub use config::{ApplicationConfig, ConfigStore, HostConfig, JsonConfigStore};
pub use control::{Command, ControlPlane, EventSink, Reply, Request, Status, Target};
pub use error::{HostError, Result};
pub use manager::{BulkResult, LifecycleManager};
pub use registry::{Module, Registry};
