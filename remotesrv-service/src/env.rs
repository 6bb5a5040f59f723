use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filesys::Filesys;
use crate::store::{FileChunkStore, SharedStore};

/// Name of the directory marking a repository root.
pub const REPO_DIR: &str = ".chunkstore";

/// The only repository format this version understands.
pub const REPO_FORMAT: &str = "1";

const STATE_FILE: &str = "repo_state.json";
const DATA_DIR: &str = "data";
const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Looks up the home directory of the current user.
pub type HomeDirProvider = fn() -> Option<PathBuf>;

/// The default [`HomeDirProvider`].
pub fn current_user_home_dir() -> Option<PathBuf> {
    home::home_dir()
}

/// Errors loading a repository environment.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The directory has no repository marker.
    #[error("{} is not a repository root (missing .chunkstore directory)", .0.display())]
    NotARepository(PathBuf),

    /// A metadata file exists but cannot be decoded.
    #[error("corrupt repository metadata in {}", path.display())]
    CorruptMetadata {
        /// The offending file.
        path: PathBuf,
        /// The decoding error.
        #[source]
        cause: serde_json::Error,
    },

    /// The repository was written by an incompatible version.
    #[error("unsupported repository format `{0}`, expected `1`")]
    UnsupportedFormat(String),

    /// A metadata file could not be read or written.
    #[error("failed to access {}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        cause: io::Error,
    },

    /// The repository's chunk store could not be opened.
    #[error("failed to open repository store")]
    Store(#[source] crate::Error),
}

/// Per-repository metadata stored in `.chunkstore/repo_state.json`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RepoState {
    /// The repository format version.
    pub format: String,
}

/// User-wide settings stored in `~/.chunkstore/config.json`.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct GlobalConfig(pub BTreeMap<String, String>);

/// A validated repository together with its opened chunk store.
#[derive(Debug)]
pub struct RepoEnv {
    root: PathBuf,
    identity: String,
    state: RepoState,
    global_config: GlobalConfig,
    store: Arc<FileChunkStore>,
}

impl RepoEnv {
    /// Loads the repository rooted at the filesystem's working directory.
    ///
    /// `identity` names the tool opening the repository and is only used for diagnostics. The home
    /// directory is consulted for the optional global configuration; a missing home directory or
    /// configuration file is not an error.
    pub async fn load(
        home_dir: HomeDirProvider,
        fs: &Filesys,
        identity: &str,
    ) -> Result<Self, EnvError> {
        let root = fs.root().to_owned();
        let repo_dir = root.join(REPO_DIR);
        if !fs.is_dir(&repo_dir).await {
            return Err(EnvError::NotARepository(root));
        }

        let state: RepoState = read_json(&repo_dir.join(STATE_FILE))
            .await?
            .ok_or_else(|| EnvError::NotARepository(root.clone()))?;
        if state.format != REPO_FORMAT {
            return Err(EnvError::UnsupportedFormat(state.format));
        }

        let global_config = match home_dir() {
            Some(home) => read_json(&home.join(REPO_DIR).join(GLOBAL_CONFIG_FILE))
                .await?
                .unwrap_or_default(),
            None => {
                tracing::debug!("no home directory, skipping global config");
                GlobalConfig::default()
            }
        };

        let store = FileChunkStore::open(&repo_dir.join(DATA_DIR))
            .await
            .map_err(EnvError::Store)?;

        tracing::info!(root = %root.display(), identity, "loaded repository");

        Ok(Self {
            root,
            identity: identity.to_owned(),
            state,
            global_config,
            store: Arc::new(store),
        })
    }

    /// Initializes an empty repository at the filesystem's working directory.
    pub async fn init(fs: &Filesys) -> Result<(), EnvError> {
        let repo_dir = fs.root().join(REPO_DIR);
        let state_path = repo_dir.join(STATE_FILE);
        let io_error = |cause| EnvError::Io {
            path: state_path.clone(),
            cause,
        };

        tokio::fs::create_dir_all(&repo_dir)
            .await
            .map_err(io_error)?;

        let state = RepoState {
            format: REPO_FORMAT.to_owned(),
        };
        let contents = serde_json::to_vec_pretty(&state).map_err(|cause| {
            EnvError::CorruptMetadata {
                path: state_path.clone(),
                cause,
            }
        })?;
        tokio::fs::write(&state_path, contents)
            .await
            .map_err(io_error)?;

        Ok(())
    }

    /// The repository root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The identity passed to [`load`](Self::load).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The repository metadata.
    pub fn state(&self) -> &RepoState {
        &self.state
    }

    /// The user-wide configuration.
    pub fn global_config(&self) -> &GlobalConfig {
        &self.global_config
    }

    /// The repository's chunk store.
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }
}

/// Reads and decodes a JSON file, returning `None` if it does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EnvError> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(cause) => {
            return Err(EnvError::Io {
                path: path.into(),
                cause,
            });
        }
    };

    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|cause| EnvError::CorruptMetadata {
            path: path.into(),
            cause,
        })
}
