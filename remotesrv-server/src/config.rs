//! Configuration for the remotesrv server.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags (see [`cli`](crate::cli))
//! 2. Environment variables (prefixed with `REMOTESRV__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `REMOTESRV__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `REMOTESRV__GRPC_ADDR=0.0.0.0:50051` sets the RPC listen address
//! - `REMOTESRV__LOGGING__FORMAT=json` switches to JSON logs
//!
//! # YAML Configuration File
//!
//! ```yaml
//! grpc_addr: 0.0.0.0:50051
//! http_addr: 0.0.0.0:80
//! http_host: chunks.example.com
//! read_only: true
//!
//! logging:
//!   level: debug
//!   format: json
//! ```

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "REMOTESRV__";

/// Runtime configuration for the Tokio async runtime.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the server runtime.
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `REMOTESRV__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled unless a DSN is configured.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN. When `None`, Sentry integration is disabled.
    ///
    /// # Environment Variable
    ///
    /// `REMOTESRV__SENTRY__DSN`
    pub dsn: Option<String>,

    /// Environment name for this deployment, e.g. "production".
    pub environment: Option<Cow<'static, str>>,

    /// Server name or identifier reported with events.
    pub server_name: Option<Cow<'static, str>>,

    /// Error event sample rate between `0.0` and `1.0`. Defaults to `1.0`.
    pub sample_rate: f32,

    /// Performance tracing sample rate between `0.0` and `1.0`. Defaults to `0.01`.
    pub traces_sample_rate: f32,

    /// Enables Sentry SDK debug output.
    pub debug: bool,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty printing with colors on a terminal, simplified output otherwise.
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level, overridden by `RUST_LOG`. Defaults to `info`.
    ///
    /// # Environment Variable
    ///
    /// `REMOTESRV__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Output format. Defaults to `auto`.
    ///
    /// # Environment Variable
    ///
    /// `REMOTESRV__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Main configuration struct for the remotesrv server.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Rejects all write operations when `true`.
    ///
    /// # Flag / Environment Variable
    ///
    /// `--read-only` / `REMOTESRV__READ_ONLY`
    pub read_only: bool,

    /// Serves the single repository at the working directory instead of one repository per
    /// directory below it.
    ///
    /// # Flag / Environment Variable
    ///
    /// `--repo-mode` / `REMOTESRV__REPO_MODE`
    pub repo_mode: bool,

    /// Directory to change into before startup. `None` keeps the current working directory.
    ///
    /// # Flag / Environment Variable
    ///
    /// `--dir` / `REMOTESRV__DIR`
    pub dir: Option<PathBuf>,

    /// RPC listen address, may contain address templates.
    ///
    /// # Default
    ///
    /// `localhost:50051`
    ///
    /// # Flag / Environment Variable
    ///
    /// `--grpc-addr` / `REMOTESRV__GRPC_ADDR`
    pub grpc_addr: String,

    /// HTTP listen address, may contain address templates.
    ///
    /// If this resolves to the same address as [`grpc_addr`](Self::grpc_addr), both protocols are
    /// served over a single listener.
    ///
    /// # Default
    ///
    /// `localhost:80`
    ///
    /// # Flag / Environment Variable
    ///
    /// `--http-addr` / `REMOTESRV__HTTP_ADDR`
    pub http_addr: String,

    /// Host used in URLs generated by the server.
    ///
    /// When `None`, the host is taken from the authority of each request.
    ///
    /// # Flag / Environment Variable
    ///
    /// `--http-host` / `REMOTESRV__HTTP_HOST`
    pub http_host: Option<String>,

    /// Tokio runtime configuration.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry configuration.
    pub sentry: Sentry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_only: false,
            repo_mode: false,
            dir: None,
            grpc_addr: "localhost:50051".to_owned(),
            http_addr: "localhost:80".to_owned(),
            http_host: None,
            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
        }
    }
}

/// Configuration values given on the command line.
///
/// Only values that were actually passed are serialized, so that unset flags do not override
/// values from other sources.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// `--read-only`
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    /// `--repo-mode`
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub repo_mode: bool,
    /// `--dir`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// `--grpc-addr`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_addr: Option<String>,
    /// `--http-addr`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_addr: Option<String>,
    /// `--http-host`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_host: Option<String>,
}

impl Config {
    /// Loads the configuration from defaults, the optional YAML file, the environment and the
    /// command line overrides.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        // Empty strings are the explicit way of asking for the defaults.
        config.dir = config.dir.filter(|dir| !dir.as_os_str().is_empty());
        config.http_host = config.http_host.filter(|host| !host.is_empty());

        Ok(config)
    }
}
