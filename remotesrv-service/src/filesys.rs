use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// A view of the local filesystem rooted at a working directory.
///
/// Repository identifiers received over the network are interpreted relative to this root, and
/// [`abs`](Self::abs) refuses identifiers that would resolve outside of it.
#[derive(Clone, Debug)]
pub struct Filesys {
    root: PathBuf,
}

impl Filesys {
    /// Creates a filesystem rooted at the given directory.
    ///
    /// The directory is canonicalized, so `"."` roots the filesystem at the current working
    /// directory of the process.
    pub fn with_working_dir(path: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(path)?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }

        Ok(Self { root })
    }

    /// Returns the absolute root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an identifier to an absolute path below the root.
    ///
    /// Leading slashes are ignored and `.`/`..` components are normalized lexically. An identifier
    /// that climbs above the root is rejected with [`Error::PathEscapesRoot`].
    pub fn abs(&self, identifier: &str) -> Result<PathBuf> {
        let mut parts = Vec::new();

        for component in Path::new(identifier).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(Error::PathEscapesRoot(identifier.to_owned()));
                    }
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        let mut path = self.root.clone();
        path.extend(parts);
        Ok(path)
    }

    /// Returns `true` if the path exists.
    pub async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    /// Returns `true` if the path exists and is a directory.
    pub async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
    }

    /// Creates the directory and all of its parents.
    pub async fn mkdirs(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }
}
