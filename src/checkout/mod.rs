//! Checkout handling - the working copy a run owns exclusively.
//!
//! All file paths coming from build output or fix proposals are resolved
//! through [`Checkout::resolve`], which keeps them inside the checkout root.
//! All writes into the checkout go through [`write_atomic`].

mod repo;

pub use repo::RepoManager;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{BuildFixerError, Result};

/// A validated checkout directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    root: PathBuf,
}

impl Checkout {
    /// Open an existing checkout directory.
    ///
    /// Fails if the path does not exist or is not a directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BuildFixerError::Checkout(format!("{} does not exist", path.display())));
        }
        if !path.is_dir() {
            return Err(BuildFixerError::Checkout(format!("{} is not a directory", path.display())));
        }
        let root = path
            .canonicalize()
            .map_err(|e| BuildFixerError::Checkout(format!("cannot resolve {}: {}", path.display(), e)))?;
        Ok(Self { root })
    }

    /// Canonical root of the checkout
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the checkout directory is still present
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Join a relative path onto the root without touching the filesystem
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Resolve a path to an existing file inside the checkout.
    ///
    /// Relative paths are taken from the checkout root. Absolute paths are
    /// accepted only when they point inside the checkout. Returns `None` when
    /// the file does not exist or escapes the root (including via symlinks).
    pub fn resolve(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };
        let canonical = joined.canonicalize().ok()?;
        canonical.starts_with(&self.root).then_some(canonical)
    }

    /// Express a path relative to the checkout root when it lies inside it.
    pub fn relativize(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Replace a file's contents atomically.
///
/// Content goes to a temporary file in the same directory, which is synced
/// and renamed over the target. The previous permissions are carried over.
/// A read-only target fails with `PermissionDenied` and is left as it was.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());
    if permissions.as_ref().is_some_and(|p| p.readonly()) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("{} is read-only", path.display()),
        ));
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    if let Some(perms) = permissions {
        tmp.as_file().set_permissions(perms)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
