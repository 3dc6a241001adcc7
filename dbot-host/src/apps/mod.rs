//! Application types compiled into the host.

mod echo;

pub use echo::{Echo, EchoArguments, EchoHandler};

use crate::registry::{Module, Registry};

/// Registry with every built-in module (`apps.echo`).
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("echo", || Module::new().with_default::<Echo>());
    registry
}
