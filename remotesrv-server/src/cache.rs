//! Selection of the store cache backing all requests.
//!
//! The server obtains the [`ChunkStore`](remotesrv_service::ChunkStore) for a request through a
//! [`StoreCache`]. There are two strategies, chosen once at startup by [`select`]:
//!
//! - [`SingletonCache`] serves one repository that was opened and validated at startup. The
//!   repository path in a request is ignored.
//! - [`LocalCache`] treats the repository path of a request as a directory below the working
//!   directory and opens a store there on first use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use remotesrv_service::{
    FileChunkStore, Filesys, HomeDirProvider, RepoEnv, SharedStore, StoreCache,
};
use tokio::sync::{Mutex, OnceCell};

/// Identity used when opening the repository in repo-mode.
pub const REPO_IDENTITY: &str = "remotesrv";

/// A cache that hands out the same store for every repository path.
#[derive(Debug)]
pub struct SingletonCache {
    store: SharedStore,
}

impl SingletonCache {
    /// Wraps an already opened store.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl StoreCache for SingletonCache {
    async fn get(&self, _repo_path: &str) -> remotesrv_service::Result<SharedStore> {
        Ok(self.store.clone())
    }
}

/// A cache that opens one store per directory below the working directory.
///
/// Stores are keyed by their resolved path and kept open for the lifetime of the cache.
/// Concurrent first requests for the same path wait for a single open instead of racing.
#[derive(Debug)]
pub struct LocalCache {
    fs: Filesys,
    stores: Mutex<HashMap<PathBuf, Arc<OnceCell<SharedStore>>>>,
}

impl LocalCache {
    /// Creates an empty cache over the given filesystem. No store is opened until requested.
    pub fn new(fs: Filesys) -> Self {
        Self {
            fs,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of stores opened so far.
    pub async fn open_count(&self) -> usize {
        let stores = self.stores.lock().await;
        stores.values().filter(|cell| cell.initialized()).count()
    }
}

#[async_trait::async_trait]
impl StoreCache for LocalCache {
    async fn get(&self, repo_path: &str) -> remotesrv_service::Result<SharedStore> {
        let path = self.fs.abs(repo_path)?;

        let cell = {
            let mut stores = self.stores.lock().await;
            stores.entry(path.clone()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            self.fs.mkdirs(&path).await?;
            let store = FileChunkStore::open(&path).await?;
            tracing::info!(path = %path.display(), "opened repository store");
            Ok::<_, remotesrv_service::Error>(Arc::new(store) as SharedStore)
        })
        .await
        .cloned()
    }
}

/// The store cache strategy of a server, fixed at startup.
#[derive(Debug)]
pub enum CacheStrategy {
    /// Repo-mode: a single pre-opened repository.
    Singleton(SingletonCache),
    /// Multi-repo mode: stores opened lazily per directory.
    Local(LocalCache),
}

#[async_trait::async_trait]
impl StoreCache for CacheStrategy {
    async fn get(&self, repo_path: &str) -> remotesrv_service::Result<SharedStore> {
        match self {
            CacheStrategy::Singleton(cache) => cache.get(repo_path).await,
            CacheStrategy::Local(cache) => cache.get(repo_path).await,
        }
    }
}

/// Chooses the cache strategy for the server.
///
/// In repo-mode, the repository at the filesystem's working directory is loaded and validated
/// right away; failing to load it is an error. Otherwise, no store is opened here.
pub async fn select(
    repo_mode: bool,
    fs: &Filesys,
    home_dir: HomeDirProvider,
) -> anyhow::Result<CacheStrategy> {
    if !repo_mode {
        tracing::info!(root = %fs.root().display(), "serving repositories below working directory");
        return Ok(CacheStrategy::Local(LocalCache::new(fs.clone())));
    }

    let env = RepoEnv::load(home_dir, fs, REPO_IDENTITY)
        .await
        .context("repo-mode failed to load repository")?;

    Ok(CacheStrategy::Singleton(SingletonCache::new(env.store())))
}

#[cfg(test)]
mod tests {
    use remotesrv_service::{EnvError, Error};

    use super::*;

    fn no_home() -> Option<PathBuf> {
        None
    }

    fn same_store(a: &SharedStore, b: &SharedStore) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
    }

    #[tokio::test]
    async fn local_cache_opens_nothing_upfront() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();

        let CacheStrategy::Local(cache) = select(false, &fs, no_home).await.unwrap() else {
            panic!("expected local cache");
        };

        assert_eq!(cache.open_count().await, 0);
        assert_eq!(std::fs::read_dir(tempdir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn local_cache_separates_repositories() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        let cache = select(false, &fs, no_home).await.unwrap();

        let a = cache.get("org/a").await.unwrap();
        let b = cache.get("org/b").await.unwrap();
        assert!(!same_store(&a, &b));
        assert_eq!(a.path(), tempdir.path().canonicalize().unwrap().join("org/a"));

        // Equivalent spellings resolve to the same directory and store.
        let a_again = cache.get("/org/./a").await.unwrap();
        assert!(same_store(&a, &a_again));
    }

    #[tokio::test]
    async fn local_cache_opens_once_under_concurrency() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        let cache = Arc::new(LocalCache::new(fs));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("shared").await.unwrap() })
            })
            .collect();

        let mut stores = Vec::new();
        for task in tasks {
            stores.push(task.await.unwrap());
        }

        assert!(stores.iter().all(|store| same_store(store, &stores[0])));
        assert_eq!(cache.open_count().await, 1);
    }

    #[tokio::test]
    async fn local_cache_rejects_escaping_paths() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        let cache = LocalCache::new(fs);

        let result = cache.get("../outside").await;
        assert!(matches!(result, Err(Error::PathEscapesRoot(_))));
        assert_eq!(cache.open_count().await, 0);
    }

    #[tokio::test]
    async fn repo_mode_serves_a_single_store() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();
        RepoEnv::init(&fs).await.unwrap();

        let cache = select(true, &fs, no_home).await.unwrap();
        assert!(matches!(cache, CacheStrategy::Singleton(_)));

        let a = cache.get("org/a").await.unwrap();
        let b = cache.get("something/else").await.unwrap();
        let c = cache.get("").await.unwrap();
        assert!(same_store(&a, &b));
        assert!(same_store(&a, &c));
    }

    #[tokio::test]
    async fn repo_mode_requires_a_repository() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = Filesys::with_working_dir(tempdir.path()).unwrap();

        let err = select(true, &fs, no_home).await.unwrap_err();
        assert_eq!(err.to_string(), "repo-mode failed to load repository");
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::NotARepository(_))
        ));
    }
}
