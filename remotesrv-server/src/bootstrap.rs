//! Assembly of a bound server from the loaded configuration.
//!
//! [`run`] is the whole startup sequence: it resolves the listen addresses, opens the working
//! directory, selects the store cache, binds the listeners via [`bootstrap`] and hands the result
//! to the [`Lifecycle`]. Every failure along the way is fatal and carries the step that failed.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use remotesrv_service::{Filesys, current_user_home_dir};
use tokio_util::sync::CancellationToken;

use crate::address::{self, ResolvedAddress};
use crate::cache::{self, CacheStrategy};
use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::web::{Listeners, Server, ServerArgs};

/// The fully resolved inputs of [`bootstrap`].
#[derive(Debug)]
pub struct ServerConfiguration {
    /// Rejects write operations when `true`.
    pub read_only: bool,
    /// Whether `cache` serves the single repository at the working directory.
    pub repo_mode: bool,
    /// Address of the RPC interface.
    pub grpc_addr: ResolvedAddress,
    /// Address of the chunk transfer interface.
    pub http_addr: ResolvedAddress,
    /// Host override for generated URLs.
    pub http_host: Option<String>,
    /// The working directory.
    pub fs: Filesys,
    /// The selected store cache.
    pub cache: CacheStrategy,
}

/// A constructed server with bound listeners, ready to serve.
#[derive(Debug)]
pub struct ServerHandle {
    server: Server,
    listeners: Listeners,
}

impl ServerHandle {
    /// The server.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The bound listeners.
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Splits the handle into the server and its listeners.
    pub fn into_parts(self) -> (Server, Listeners) {
        (self.server, self.listeners)
    }
}

/// Constructs the server and binds its listeners.
pub async fn bootstrap(config: ServerConfiguration) -> Result<ServerHandle> {
    let repo_mode = config.repo_mode;
    if repo_mode != matches!(config.cache, CacheStrategy::Singleton(_)) {
        anyhow::bail!(
            "error creating server: cache strategy does not match repo-mode={repo_mode}"
        );
    }
    let server = Server::new(ServerArgs {
        read_only: config.read_only,
        http_host: config.http_host,
        grpc_addr: config.grpc_addr,
        http_addr: config.http_addr,
        fs: config.fs,
        cache: Arc::new(config.cache),
    })
    .context("error creating server")?;

    let listeners = server
        .listeners()
        .await
        .context("error starting server listeners")?;

    tracing::info!(
        listeners = listeners.len(),
        read_only = server.state().read_only,
        repo_mode,
        "server bootstrapped"
    );

    Ok(ServerHandle { server, listeners })
}

/// Resolves the configuration into a running server and serves until `shutdown` is cancelled.
///
/// `working_dir` is the directory repositories are served from.
pub async fn run(config: &Config, working_dir: &Path, shutdown: CancellationToken) -> Result<()> {
    let grpc_addr = address::resolve(&config.grpc_addr).context("parse grpc addr")?;
    let http_addr = address::resolve(&config.http_addr).context("parse http addr")?;

    let fs = Filesys::with_working_dir(working_dir).with_context(|| {
        format!("could not open working directory {}", working_dir.display())
    })?;

    let cache = cache::select(config.repo_mode, &fs, current_user_home_dir).await?;

    let handle = bootstrap(ServerConfiguration {
        read_only: config.read_only,
        repo_mode: config.repo_mode,
        grpc_addr,
        http_addr,
        http_host: config.http_host.clone(),
        fs,
        cache,
    })
    .await?;

    Lifecycle::new(shutdown).run(handle).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(grpc_addr: &str, http_addr: &str) -> Config {
        Config {
            grpc_addr: grpc_addr.into(),
            http_addr: http_addr.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_empty_host() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = config(":50051", "127.0.0.1:0");

        let err = run(&config, tempdir.path(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "parse grpc addr");
        assert!(format!("{err:#}").contains("host can't be empty"));
    }

    #[tokio::test]
    async fn rejects_malformed_http_addr() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = config("127.0.0.1:0", "no-port");

        let err = run(&config, tempdir.path(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "parse http addr");
    }

    #[tokio::test]
    async fn rejects_missing_working_dir() {
        let tempdir = tempfile::tempdir().unwrap();
        let missing = tempdir.path().join("missing");
        let config = config("127.0.0.1:0", "127.0.0.1:0");

        let err = run(&config, &missing, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("could not open working directory"));
    }

    #[tokio::test]
    async fn repo_mode_requires_a_repository() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = Config {
            repo_mode: true,
            ..config("127.0.0.1:0", "127.0.0.1:0")
        };

        let err = run(&config, tempdir.path(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "repo-mode failed to load repository");
    }

    #[tokio::test]
    async fn bootstrap_binds_shared_listener() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        let cache = cache::select(false, &fs, || None).await.unwrap();

        let handle = bootstrap(ServerConfiguration {
            read_only: true,
            repo_mode: false,
            grpc_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_host: None,
            fs,
            cache,
        })
        .await
        .unwrap();

        assert_eq!(handle.listeners().len(), 1);
        assert!(handle.server().state().read_only);
    }

    #[tokio::test]
    async fn bootstrap_checks_repo_mode_against_cache() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        let cache = cache::select(false, &fs, || None).await.unwrap();

        let err = bootstrap(ServerConfiguration {
            read_only: false,
            repo_mode: true,
            grpc_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_host: None,
            fs: fs.clone(),
            cache,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("repo-mode=true"));

        remotesrv_service::RepoEnv::init(&fs).await.unwrap();
        let cache = cache::select(true, &fs, || None).await.unwrap();
        let handle = bootstrap(ServerConfiguration {
            read_only: false,
            repo_mode: true,
            grpc_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_host: None,
            fs,
            cache,
        })
        .await
        .unwrap();
        assert_eq!(handle.listeners().len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_reports_invalid_http_host() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        let cache = cache::select(false, &fs, || None).await.unwrap();

        let err = bootstrap(ServerConfiguration {
            read_only: false,
            repo_mode: false,
            grpc_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_host: Some("bad host".into()),
            fs,
            cache,
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "error creating server");
    }
}
