use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ChunkStore;
use crate::error::{Error, Result};
use crate::hash::ChunkHash;

const CHUNKS_DIR: &str = "chunks";
const MANIFEST_FILE: &str = "manifest.json";

/// The persisted root pointer of a [`FileChunkStore`].
#[derive(Debug, Default, Deserialize, Serialize)]
struct Manifest {
    root: Option<ChunkHash>,
}

/// A [`ChunkStore`] keeping one file per chunk below a directory.
///
/// ```text
/// <path>/
///   manifest.json
///   chunks/<hash>
/// ```
#[derive(Debug)]
pub struct FileChunkStore {
    path: PathBuf,
    manifest_lock: Mutex<()>,
}

impl FileChunkStore {
    /// Opens the store rooted at `path`, creating the directory layout if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(path.join(CHUNKS_DIR)).await?;
        tracing::debug!(path = %path.display(), "opened chunk store");

        Ok(Self {
            path: path.into(),
            manifest_lock: Mutex::new(()),
        })
    }

    fn chunk_path(&self, hash: &ChunkHash) -> PathBuf {
        self.path.join(CHUNKS_DIR).join(hash.as_str())
    }

    fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    async fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Manifest::default()),
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&contents).map_err(|cause| Error::Corrupt { path, cause })
    }

    /// Writes to a temporary sibling and renames it over `path`, so readers never observe a
    /// partially written file.
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        let mut writer = BufWriter::new(file);
        writer.write_all(contents).await?;
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_data().await?;
        drop(file);

        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChunkStore for FileChunkStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.chunk_path(hash)).await {
            Ok(contents) => Ok(Some(contents.into())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn has_chunk(&self, hash: &ChunkHash) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.chunk_path(hash)).await?)
    }

    async fn put_chunk(&self, hash: &ChunkHash, contents: Bytes) -> Result<()> {
        let path = self.chunk_path(hash);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        self.write_atomic(&path, &contents).await
    }

    async fn root(&self) -> Result<Option<ChunkHash>> {
        Ok(self.read_manifest().await?.root)
    }

    async fn commit(&self, current: &ChunkHash, last: Option<&ChunkHash>) -> Result<bool> {
        if !self.has_chunk(current).await? {
            return Err(Error::MissingChunk(current.to_string()));
        }

        let _guard = self.manifest_lock.lock().await;
        let manifest = self.read_manifest().await?;
        if manifest.root.as_ref() != last {
            tracing::debug!(
                expected = ?last,
                actual = ?manifest.root,
                "rejecting commit on stale root"
            );
            return Ok(false);
        }

        let manifest = Manifest {
            root: Some(current.clone()),
        };
        let contents = serde_json::to_vec(&manifest).map_err(|cause| Error::Corrupt {
            path: self.manifest_path(),
            cause,
        })?;
        self.write_atomic(&self.manifest_path(), &contents).await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> ChunkHash {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn stores_chunks() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(tempdir.path()).await.unwrap();

        assert!(!store.has_chunk(&hash("abc")).await.unwrap());
        assert_eq!(store.get_chunk(&hash("abc")).await.unwrap(), None);

        store
            .put_chunk(&hash("abc"), Bytes::from_static(b"oh hai!"))
            .await
            .unwrap();

        assert!(store.has_chunk(&hash("abc")).await.unwrap());
        let contents = store.get_chunk(&hash("abc")).await.unwrap().unwrap();
        assert_eq!(contents.as_ref(), b"oh hai!");
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(tempdir.path()).await.unwrap();

        store
            .put_chunk(&hash("abc"), Bytes::from_static(b"first"))
            .await
            .unwrap();
        store
            .put_chunk(&hash("abc"), Bytes::from_static(b"first"))
            .await
            .unwrap();

        let contents = store.get_chunk(&hash("abc")).await.unwrap().unwrap();
        assert_eq!(contents.as_ref(), b"first");
    }

    #[tokio::test]
    async fn commit_compares_and_swaps() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(tempdir.path()).await.unwrap();
        store.put_chunk(&hash("one"), Bytes::new()).await.unwrap();
        store.put_chunk(&hash("two"), Bytes::new()).await.unwrap();

        assert_eq!(store.root().await.unwrap(), None);
        assert!(store.commit(&hash("one"), None).await.unwrap());
        assert_eq!(store.root().await.unwrap(), Some(hash("one")));

        // Stale `last` is rejected and leaves the root untouched.
        assert!(!store.commit(&hash("two"), None).await.unwrap());
        assert_eq!(store.root().await.unwrap(), Some(hash("one")));

        assert!(store.commit(&hash("two"), Some(&hash("one"))).await.unwrap());
        assert_eq!(store.root().await.unwrap(), Some(hash("two")));
    }

    #[tokio::test]
    async fn commit_requires_existing_chunk() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(tempdir.path()).await.unwrap();

        let result = store.commit(&hash("missing"), None).await;
        assert!(matches!(result, Err(Error::MissingChunk(_))));
    }

    #[tokio::test]
    async fn reports_corrupt_manifest() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(tempdir.path()).await.unwrap();
        std::fs::write(tempdir.path().join(MANIFEST_FILE), b"{not json").unwrap();

        assert!(matches!(store.root().await, Err(Error::Corrupt { .. })));
    }

    #[tokio::test]
    async fn root_survives_reopen() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(tempdir.path()).await.unwrap();
        store.put_chunk(&hash("one"), Bytes::new()).await.unwrap();
        assert!(store.commit(&hash("one"), None).await.unwrap());
        drop(store);

        let store = FileChunkStore::open(tempdir.path()).await.unwrap();
        assert_eq!(store.root().await.unwrap(), Some(hash("one")));
    }
}
