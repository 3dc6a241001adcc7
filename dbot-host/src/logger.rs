//! Tracing setup: a fmt layer for the process log plus the forward layer for operators.
//!
//! Both layers share the level directives; the forward layer is further capped at the web level.
//!
//! The fmt layer writes to stderr (stdout carries the console protocol) and, when a log file is
//! given, to that file as well.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::Subscriber;
use tracing_subscriber::filter::combinator::And;
use tracing_subscriber::filter::{FilterExt, LevelFilter};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::HostConfig;
use crate::log_forward::ForwardLayer;

/// Crates whose events use the local level instead of the global one.
const LOCAL_CRATES: &[&str] = &["dbot_host", "dbot_telegram", "dbot_core", "handler_chain"];

/// `global,crate=local,...`; `RUST_LOG` wins when set.
pub fn filter_directives(global: LevelFilter, local: LevelFilter) -> String {
    let mut directives = vec![global.to_string().to_lowercase()];
    directives.extend(
        LOCAL_CRATES
            .iter()
            .map(|name| format!("{}={}", name, local.to_string().to_lowercase())),
    );
    directives.join(",")
}

fn level_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// What reaches operators: the process filter, capped at the web level.
pub fn forward_filter<S>(levels: EnvFilter, web: LevelFilter) -> And<EnvFilter, LevelFilter, S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    levels.and(web)
}

/// Installs the global subscriber. Call after `.env` is loaded so `RUST_LOG` is seen.
pub fn init_tracing(
    config: &HostConfig,
    log_file: Option<&Path>,
    forward: ForwardLayer,
) -> anyhow::Result<()> {
    let directives = filter_directives(config.global_level()?, config.local_level()?);
    let env_filter = level_filter(&directives);
    let forward_filter = forward_filter(level_filter(&directives), config.web_level()?);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = io::stderr.and(Arc::new(file));
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter)
                .boxed()
        }
        None => tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    Registry::default()
        .with(fmt_layer)
        .with(forward.with_filter(forward_filter))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))?;

    Ok(())
}
