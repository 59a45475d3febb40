//! RepoManager produces fresh checkouts by cloning a repository URL.
//!
//! The engine itself only ever sees a checkout path; this is the thin
//! repository-manager collaborator used by the CLI.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::error::{BuildFixerError, Result};

/// Clones repositories into a base directory, one directory per project.
#[derive(Debug)]
pub struct RepoManager {
    /// Directory where checkouts are created
    base_path: PathBuf,
}

impl RepoManager {
    /// Create a new RepoManager rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Base directory for checkouts
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Derive the checkout directory name from a repository URL.
    ///
    /// `https://github.com/org/project.git` and `git@host:org/project` both
    /// map to `project`.
    pub fn project_name(url: &str) -> Result<String> {
        let trimmed = url.trim().trim_end_matches('/');
        let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
        let name = last.strip_suffix(".git").unwrap_or(last);

        if name.is_empty() || name == "." || name == ".." {
            return Err(BuildFixerError::Repository(format!(
                "Cannot derive project name from '{}'",
                url
            )));
        }
        Ok(name.to_string())
    }

    /// Checkout path for a repository URL.
    pub fn path(&self, url: &str) -> Result<PathBuf> {
        Ok(self.base_path.join(Self::project_name(url)?))
    }

    /// Clone `url` into a fresh checkout and return its path.
    ///
    /// A stale directory from a previous clone of the same project is
    /// removed first, so every run starts from the remote state.
    pub fn clone_repo(&self, url: &str) -> Result<PathBuf> {
        let checkout_path = self.path(url)?;

        std::fs::create_dir_all(&self.base_path)
            .map_err(|e| BuildFixerError::Repository(format!("Failed to create base path: {}", e)))?;

        if checkout_path.exists() {
            debug!("Removing stale checkout {}", checkout_path.display());
            std::fs::remove_dir_all(&checkout_path).map_err(|e| {
                BuildFixerError::Repository(format!("Failed to remove stale checkout: {}", e))
            })?;
        }

        info!("Cloning {} into {}", url, checkout_path.display());
        let output = Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(url)
            .arg(&checkout_path)
            .output()
            .map_err(|e| BuildFixerError::Repository(format!("Failed to execute git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildFixerError::Repository(format!(
                "Failed to clone {}: {}",
                url,
                stderr.trim()
            )));
        }

        if !checkout_path.is_dir() {
            return Err(BuildFixerError::Repository(format!(
                "Clone of {} produced no checkout",
                url
            )));
        }

        Ok(checkout_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_repo() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let repo_path = temp.path().join("origin").join("demo.git");
        std::fs::create_dir_all(&repo_path).unwrap();

        let git = |args: &[&str]| {
            Command::new("git").args(args).current_dir(&repo_path).output().unwrap();
        };

        git(&["init"]);
        git(&["config", "user.email", "test@test.com"]);
        git(&["config", "user.name", "Test"]);
        std::fs::write(repo_path.join("gradle.properties"), "depVersion=1.0\n").unwrap();
        git(&["add", "."]);
        git(&["commit", "-m", "Initial commit"]);

        (temp, repo_path)
    }

    #[test]
    fn test_project_name() {
        assert_eq!(RepoManager::project_name("https://github.com/org/project.git").unwrap(), "project");
        assert_eq!(RepoManager::project_name("https://github.com/org/project/").unwrap(), "project");
        assert_eq!(RepoManager::project_name("git@github.com:org/project.git").unwrap(), "project");
        assert_eq!(RepoManager::project_name("/srv/repos/app").unwrap(), "app");
    }

    #[test]
    fn test_project_name_invalid() {
        assert!(RepoManager::project_name("").is_err());
        assert!(RepoManager::project_name("https://host/.git").is_err());
        assert!(RepoManager::project_name("..").is_err());
    }

    #[test]
    fn test_path() {
        let manager = RepoManager::new("/tmp/checkouts");
        assert_eq!(
            manager.path("https://example.com/x/demo.git").unwrap(),
            PathBuf::from("/tmp/checkouts/demo")
        );
        assert_eq!(manager.base_path(), Path::new("/tmp/checkouts"));
    }

    #[test]
    fn test_clone_repo() {
        let (temp, repo_path) = setup_test_repo();
        let manager = RepoManager::new(temp.path().join("checkouts"));

        let url = repo_path.to_string_lossy().to_string();
        let checkout = manager.clone_repo(&url).unwrap();

        assert_eq!(checkout, temp.path().join("checkouts").join("demo"));
        let props = std::fs::read_to_string(checkout.join("gradle.properties")).unwrap();
        assert_eq!(props, "depVersion=1.0\n");
    }

    #[test]
    fn test_clone_replaces_stale_checkout() {
        let (temp, repo_path) = setup_test_repo();
        let manager = RepoManager::new(temp.path().join("checkouts"));
        let url = repo_path.to_string_lossy().to_string();

        let stale = temp.path().join("checkouts").join("demo");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("leftover.txt"), "old run").unwrap();

        let checkout = manager.clone_repo(&url).unwrap();
        assert!(!checkout.join("leftover.txt").exists());
        assert!(checkout.join("gradle.properties").exists());
    }

    #[test]
    fn test_clone_missing_repo_fails() {
        let temp = TempDir::new().unwrap();
        let manager = RepoManager::new(temp.path().join("checkouts"));
        let missing = temp.path().join("does-not-exist");

        let result = manager.clone_repo(&missing.to_string_lossy());
        assert!(matches!(result, Err(BuildFixerError::Repository(_))));
    }
}
