//! Exposes an in-process test server for use in integration tests.
//!
//! ```
//! use remotesrv_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/health");
//!    // use the URL in tests...
//! }
//! ```

use std::net::SocketAddr;
use std::path::Path;

use remotesrv_server::address;
use remotesrv_server::bootstrap::{self, ServerConfiguration};
use remotesrv_server::cache;
use remotesrv_server::lifecycle::{Lifecycle, Phase};
use remotesrv_service::{Filesys, RepoEnv};
use serde::Serialize;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Options for a [`TestServer`].
#[derive(Debug, Default)]
pub struct TestServerBuilder {
    read_only: bool,
    repo_mode: bool,
    separate_listeners: bool,
    http_host: Option<String>,
}

impl TestServerBuilder {
    /// Rejects writes.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Initializes a repository in the temporary directory and serves it in repo-mode.
    pub fn repo_mode(mut self) -> Self {
        self.repo_mode = true;
        self
    }

    /// Binds RPC and HTTP to different ports instead of sharing one listener.
    pub fn separate_listeners(mut self) -> Self {
        self.separate_listeners = true;
        self
    }

    /// Overrides the host in generated URLs.
    pub fn http_host(mut self, host: &str) -> Self {
        self.http_host = Some(host.to_owned());
        self
    }

    /// Starts the server and waits until it is serving.
    pub async fn start(self) -> TestServer {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        if self.repo_mode {
            RepoEnv::init(&fs).await.unwrap();
        }

        let cache = cache::select(self.repo_mode, &fs, || None).await.unwrap();
        let http_addr = match self.separate_listeners {
            true => "localhost:0",
            false => "127.0.0.1:0",
        };

        let handle = bootstrap::bootstrap(ServerConfiguration {
            read_only: self.read_only,
            repo_mode: self.repo_mode,
            grpc_addr: address::resolve("127.0.0.1:0").unwrap(),
            http_addr: address::resolve(http_addr).unwrap(),
            http_host: self.http_host,
            fs,
            cache,
        })
        .await
        .unwrap();

        let listeners = handle.listeners();
        let rpc_addr = listeners.rpc_addr().unwrap();
        let http_addr = listeners.http_addr().unwrap();
        let listener_count = listeners.len();

        let shutdown = CancellationToken::new();
        let lifecycle = Lifecycle::new(shutdown.clone());
        let mut phase = lifecycle.phase();
        let handle = tokio::spawn(lifecycle.run(handle));
        phase.wait_for(|p| *p == Phase::Serving).await.unwrap();

        TestServer {
            handle: Some(handle),
            shutdown,
            rpc_addr,
            http_addr,
            listener_count,
            tempdir,
        }
    }
}

/// An in-process test server for use in integration tests.
///
/// This server runs the full server lifecycle over a temporary working directory, which is deleted
/// when the server is dropped. It listens on random available ports on localhost.
#[derive(Debug)]
pub struct TestServer {
    handle: Option<JoinHandle<anyhow::Result<()>>>,
    shutdown: CancellationToken,
    rpc_addr: SocketAddr,
    http_addr: SocketAddr,
    listener_count: usize,
    tempdir: TempDir,
}

impl TestServer {
    /// Starts a writable server with a shared listener, serving repositories below its directory.
    pub async fn new() -> Self {
        Self::builder().start().await
    }

    /// Returns a builder for a server with custom options.
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    /// Returns a full URL on the RPC listener pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.rpc_addr, path)
    }

    /// Returns a full URL on the HTTP listener pointing to the given path.
    pub fn http_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.http_addr, path)
    }

    /// The address of the RPC listener.
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// The address of the HTTP listener.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// The number of bound listeners.
    pub fn listener_count(&self) -> usize {
        self.listener_count
    }

    /// The working directory served by this server.
    pub fn dir(&self) -> &Path {
        self.tempdir.path()
    }

    /// Calls an RPC method with a JSON request body.
    pub async fn rpc(&self, method: &str, request: &impl Serialize) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url(&format!("/chunkstore.v1.ChunkStoreService/{method}")))
            .json(request)
            .send()
            .await
            .unwrap()
    }

    /// Requests a graceful stop and waits for it to complete.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
