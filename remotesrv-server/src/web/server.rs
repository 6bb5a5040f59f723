use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::uri::Authority;
use remotesrv_service::{Filesys, StoreCache};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::address::ResolvedAddress;
use crate::endpoints::Protocols;
use crate::state::{ServiceState, State};
use crate::web::app::App;

/// The maximum backlog for TCP listen sockets before refusing connections.
const TCP_LISTEN_BACKLOG: u32 = 1024;

/// Everything needed to construct a [`Server`].
#[derive(Debug)]
pub struct ServerArgs {
    /// Rejects write operations when `true`.
    pub read_only: bool,
    /// Host override for URLs handed out by the RPC interface.
    pub http_host: Option<String>,
    /// Address of the RPC interface.
    pub grpc_addr: ResolvedAddress,
    /// Address of the chunk transfer interface.
    pub http_addr: ResolvedAddress,
    /// The filesystem repositories are served from.
    pub fs: Filesys,
    /// Provides the store for each repository.
    pub cache: Arc<dyn StoreCache>,
}

/// The bound listeners of a [`Server`].
///
/// When the RPC and HTTP addresses are identical, a single listener serves both protocols.
#[derive(Debug)]
pub struct Listeners {
    rpc: TcpListener,
    http: Option<TcpListener>,
}

impl Listeners {
    /// The number of bound sockets.
    pub fn len(&self) -> usize {
        if self.http.is_some() { 2 } else { 1 }
    }

    /// Always `false`, a server binds at least one socket.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether both protocols share one socket.
    pub fn is_shared(&self) -> bool {
        self.http.is_none()
    }

    /// The local address the RPC interface is served on.
    pub fn rpc_addr(&self) -> io::Result<SocketAddr> {
        self.rpc.local_addr()
    }

    /// The local address the chunk transfer interface is served on.
    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http.as_ref().unwrap_or(&self.rpc).local_addr()
    }

    fn into_parts(self) -> Vec<(Protocols, TcpListener)> {
        match self.http {
            Some(http) => vec![(Protocols::Rpc, self.rpc), (Protocols::Http, http)],
            None => vec![(Protocols::Both, self.rpc)],
        }
    }
}

/// The remotesrv network server.
///
/// The server is cheap to clone; clones share state and the shutdown signal. Bind with
/// [`listeners`](Self::listeners), run with [`serve`](Self::serve) and stop with
/// [`graceful_stop`](Self::graceful_stop), usually from another clone.
#[derive(Clone, Debug)]
pub struct Server {
    state: ServiceState,
    grpc_addr: ResolvedAddress,
    http_addr: ResolvedAddress,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Constructs the server without binding any sockets.
    pub fn new(args: ServerArgs) -> Result<Self> {
        if let Some(host) = &args.http_host {
            host.parse::<Authority>()
                .with_context(|| format!("invalid http host `{host}`"))?;
        }

        let state = State::new(args.read_only, args.http_host, args.fs, args.cache);

        Ok(Self {
            state: Arc::new(state),
            grpc_addr: args.grpc_addr,
            http_addr: args.http_addr,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// The state shared with all request handlers.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Binds the listen sockets.
    ///
    /// Binds one socket per distinct address: identical RPC and HTTP addresses share a socket.
    pub async fn listeners(&self) -> Result<Listeners> {
        let rpc = listen(&self.grpc_addr)
            .await
            .with_context(|| format!("failed to listen on grpc addr {}", self.grpc_addr))?;

        let http = if self.http_addr == self.grpc_addr {
            tracing::info!(addr = %self.grpc_addr, "serving RPC and HTTP on a shared listener");
            None
        } else {
            let listener = listen(&self.http_addr)
                .await
                .with_context(|| format!("failed to listen on http addr {}", self.http_addr))?;
            Some(listener)
        };

        let listeners = Listeners { rpc, http };
        self.state.set_http_port(listeners.http_addr()?.port());
        Ok(listeners)
    }

    /// Serves requests on the given listeners until [`graceful_stop`](Self::graceful_stop).
    ///
    /// If any listener fails, the others are stopped as well and the error is returned.
    pub async fn serve(&self, listeners: Listeners) -> Result<()> {
        let mut tasks = JoinSet::new();
        for (protocols, listener) in listeners.into_parts() {
            let app = App::new(self.state.clone(), protocols);
            let shutdown = self.shutdown.clone();
            tasks.spawn(self.tracker.track_future(app.serve(listener, shutdown)));
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let served = joined
                .context("server task panicked")
                .and_then(|served| served);

            if let Err(err) = served {
                if result.is_ok() {
                    self.shutdown.cancel();
                    result = Err(err);
                }
            }
        }

        result
    }

    /// Stops accepting connections and waits for in-flight requests to complete.
    pub async fn graceful_stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Binds a socket to the first address `addr` resolves to, preferring IPv4.
///
/// Named ports are mapped to their number here; an empty port binds any free port.
async fn listen(addr: &ResolvedAddress) -> Result<TcpListener> {
    let port = addr
        .port_number()
        .with_context(|| format!("unknown port `{}`", addr.port()))?;
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((addr.host(), port))
        .await
        .context("failed to resolve host")?
        .collect();

    let socket_addr = candidates
        .iter()
        .find(|candidate| candidate.is_ipv4())
        .or(candidates.first())
        .copied()
        .context("host resolved to no addresses")?;

    let socket = match socket_addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(socket_addr)?;

    let listener = socket.listen(TCP_LISTEN_BACKLOG)?;
    tracing::info!("listening on {}", listener.local_addr()?);

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use crate::address;
    use crate::cache::LocalCache;

    use super::*;

    fn args(tempdir: &tempfile::TempDir, grpc_addr: &str, http_addr: &str) -> ServerArgs {
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        ServerArgs {
            read_only: false,
            http_host: None,
            grpc_addr: address::resolve(grpc_addr).unwrap(),
            http_addr: address::resolve(http_addr).unwrap(),
            cache: Arc::new(LocalCache::new(fs.clone())),
            fs,
        }
    }

    #[test]
    fn rejects_invalid_http_host() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut args = args(&tempdir, "127.0.0.1:0", "127.0.0.1:0");
        args.http_host = Some("not a host".into());

        let err = Server::new(args).unwrap_err();
        assert_eq!(err.to_string(), "invalid http host `not a host`");
    }

    #[tokio::test]
    async fn identical_addresses_share_a_listener() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = Server::new(args(&tempdir, "127.0.0.1:0", "127.0.0.1:0")).unwrap();

        let listeners = server.listeners().await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert!(listeners.is_shared());
        assert_eq!(listeners.rpc_addr().unwrap(), listeners.http_addr().unwrap());
        assert_eq!(
            server.state().http_port(),
            Some(listeners.http_addr().unwrap().port())
        );
    }

    #[tokio::test]
    async fn distinct_addresses_bind_two_listeners() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = Server::new(args(&tempdir, "127.0.0.1:0", "localhost:0")).unwrap();

        let listeners = server.listeners().await.unwrap();
        assert_eq!(listeners.len(), 2);
        assert_ne!(listeners.rpc_addr().unwrap(), listeners.http_addr().unwrap());
    }

    #[tokio::test]
    async fn binds_empty_and_named_ports() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = Server::new(args(&tempdir, "127.0.0.1:", "127.0.0.1:")).unwrap();

        let listeners = server.listeners().await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_ne!(listeners.rpc_addr().unwrap().port(), 0);

        let unknown = args(&tempdir, "127.0.0.1:no-such-service", "127.0.0.1:0");
        let server = Server::new(unknown).unwrap();
        let err = server.listeners().await.unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "failed to listen on grpc addr 127.0.0.1:no-such-service: \
             unknown port `no-such-service`"
        );
    }

    #[tokio::test]
    async fn occupied_port_fails_to_bind() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let tempdir = tempfile::tempdir().unwrap();
        let addr = format!("127.0.0.1:{port}");
        let server = Server::new(args(&tempdir, &addr, &addr)).unwrap();

        let err = server.listeners().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("failed to listen on grpc addr 127.0.0.1:{port}")
        );
    }

    #[tokio::test]
    async fn graceful_stop_ends_serve() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = Server::new(args(&tempdir, "127.0.0.1:0", "localhost:0")).unwrap();
        let listeners = server.listeners().await.unwrap();

        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listeners).await }
        });

        tokio::task::yield_now().await;
        server.graceful_stop().await;
        serving.await.unwrap().unwrap();
    }
}
