use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::hash::ChunkHash;

mod local_fs;
pub use local_fs::FileChunkStore;

/// A type-erased, shareable [`ChunkStore`] instance.
pub type SharedStore = Arc<dyn ChunkStore>;

/// A content-addressed store of chunks with a single mutable root pointer.
#[async_trait::async_trait]
pub trait ChunkStore: Debug + Send + Sync + 'static {
    /// The directory this store is rooted at, used for diagnostics.
    fn path(&self) -> &Path;

    /// Retrieves the contents of a chunk, if it exists.
    async fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Bytes>>;

    /// Returns `true` if the chunk exists.
    async fn has_chunk(&self, hash: &ChunkHash) -> Result<bool>;

    /// Stores a chunk. Storing an existing chunk again is a no-op.
    async fn put_chunk(&self, hash: &ChunkHash, contents: Bytes) -> Result<()>;

    /// Returns the current root chunk, or `None` for an empty store.
    async fn root(&self) -> Result<Option<ChunkHash>>;

    /// Moves the root from `last` to `current`.
    ///
    /// Returns `false` without changing anything if the root is no longer `last`.
    async fn commit(&self, current: &ChunkHash, last: Option<&ChunkHash>) -> Result<bool>;
}
