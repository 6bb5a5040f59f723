//! Logging, tracing and Sentry setup.

use std::env;
use std::io::IsTerminal;

use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Initializes the Sentry client if a DSN is configured.
///
/// The returned guard flushes pending events when dropped.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_config = &config.sentry;
    let dsn = sentry_config.dsn.as_deref()?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: dsn.parse().ok(),
        release: sentry::release_name!(),
        environment: sentry_config.environment.clone(),
        server_name: sentry_config.server_name.clone(),
        sample_rate: sentry_config.sample_rate,
        traces_sample_rate: sentry_config.traces_sample_rate,
        debug: sentry_config.debug,
        enable_logs: true,
        ..Default::default()
    });

    Some(guard)
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    // Same as the default filter, except it converts warnings into events
    // and also sends everything at or above INFO as logs instead of breadcrumbs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            }
            Level::INFO => sentry_tracing::EventFilter::Log,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let (level, env_filter) = parse_rust_log(config.logging.level);
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match (config.logging.format, std::io::stderr().is_terminal()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => format.pretty().boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            format.compact().with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => format
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(sentry_layer)
        .with(env_filter)
        .init();
}

/// Determines the effective log level and the per-crate filter.
///
/// `RUST_LOG` takes precedence over the configured level. If it is not a plain level, it is used
/// literally as the filter.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    // Try to parse RUST_LOG as a simple level filter and apply default levels internally.
    // Otherwise, use it literally if the user knows which overrides they want to run.
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        tower_http=TRACE,\
        remotesrv=TRACE,\
        remotesrv_server=TRACE,\
        remotesrv_service=TRACE,\
        ",
    );

    (level, env_filter)
}
