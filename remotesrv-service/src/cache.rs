use std::fmt::Debug;

use crate::error::Result;
use crate::store::SharedStore;

/// Provides the [`ChunkStore`](crate::ChunkStore) backing a repository.
///
/// The server calls [`get`](Self::get) on every request with the repository path taken from the
/// request. Implementations decide whether that path selects a store or is ignored.
#[async_trait::async_trait]
pub trait StoreCache: Debug + Send + Sync + 'static {
    /// Returns the store for `repo_path`, opening it if necessary.
    async fn get(&self, repo_path: &str) -> Result<SharedStore>;
}
