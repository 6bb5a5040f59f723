//! State shared by all request handlers.

use std::sync::{Arc, OnceLock};

use remotesrv_service::{Filesys, StoreCache};

use crate::endpoints::common::{ApiError, ApiResult};

/// Shared reference to the remotesrv [service state](State).
pub type ServiceState = Arc<State>;

/// State shared with all request handlers.
///
/// This structure is created by [`Server::new`](crate::web::Server::new). In request handlers,
/// use `axum::extract::State<ServiceState>` to retrieve a shared reference to it.
#[derive(Debug)]
pub struct State {
    /// Rejects write operations when `true`.
    pub read_only: bool,
    /// Host override for generated URLs.
    pub http_host: Option<String>,
    /// The filesystem repositories are served from.
    pub fs: Filesys,
    /// Provides the store for each repository.
    pub cache: Arc<dyn StoreCache>,
    /// Port of the bound HTTP listener, known once listeners are bound.
    http_port: OnceLock<u16>,
}

impl State {
    pub(crate) fn new(
        read_only: bool,
        http_host: Option<String>,
        fs: Filesys,
        cache: Arc<dyn StoreCache>,
    ) -> Self {
        Self {
            read_only,
            http_host,
            fs,
            cache,
            http_port: OnceLock::new(),
        }
    }

    /// Fails with [`ApiError::ReadOnly`] on a read-only server.
    pub fn ensure_writable(&self) -> ApiResult<()> {
        if self.read_only {
            return Err(ApiError::ReadOnly);
        }
        Ok(())
    }

    /// The port chunk transfers are served on.
    pub fn http_port(&self) -> Option<u16> {
        self.http_port.get().copied()
    }

    pub(crate) fn set_http_port(&self, port: u16) {
        if self.http_port.set(port).is_err() {
            tracing::warn!(port, "HTTP port already assigned");
        }
    }
}
