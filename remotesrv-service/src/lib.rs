//! The storage layer behind the remote content-store server.
//!
//! This crate provides the collaborators consumed by `remotesrv-server`:
//!
//! - [`Filesys`], a filesystem abstraction rooted at the server's working directory,
//! - [`ChunkStore`] and its file-backed implementation [`FileChunkStore`],
//! - [`RepoEnv`], which validates and opens an existing repository, and
//! - [`StoreCache`], the capability the server uses to obtain a store for a repository path.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod cache;
mod env;
mod error;
mod filesys;
mod hash;
mod store;

pub use cache::StoreCache;
pub use env::{EnvError, GlobalConfig, HomeDirProvider, REPO_DIR, RepoEnv, RepoState};
pub use env::{REPO_FORMAT, current_user_home_dir};
pub use error::{Error, Result};
pub use filesys::Filesys;
pub use hash::ChunkHash;
pub use store::{ChunkStore, FileChunkStore, SharedStore};
