//! Selection of the files shown to the advisor.

use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::checkout::Checkout;
use crate::classify::FailureSignature;

/// Gradle scripts always offered when present
const BUILD_SCRIPTS: [&str; 4] = ["build.gradle", "build.gradle.kts", "settings.gradle", "settings.gradle.kts"];

/// A checkout file and its (possibly truncated) content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevantFile {
    /// Path relative to the checkout root
    pub path: PathBuf,
    pub content: String,
    pub truncated: bool,
}

/// Collect the property file, the Gradle scripts and the file the failure points at.
///
/// Missing or non-UTF-8 files are skipped. Each file is cut to `max_bytes`.
pub fn gather_relevant_files(
    checkout: &Checkout,
    property_file: &Path,
    signature: Option<&FailureSignature>,
    max_bytes: usize,
) -> Vec<RelevantFile> {
    let mut candidates: Vec<PathBuf> = vec![property_file.to_path_buf()];
    candidates.extend(BUILD_SCRIPTS.iter().map(PathBuf::from));
    if let Some(file) = signature.and_then(FailureSignature::location_file) {
        candidates.push(file);
    }

    let mut files: Vec<RelevantFile> = Vec::new();
    for candidate in candidates {
        let Some(resolved) = checkout.resolve(&candidate).filter(|p| p.is_file()) else {
            continue;
        };
        let relative = checkout.relativize(&resolved);
        if files.iter().any(|f| f.path == relative) {
            continue;
        }
        match read_bounded(&resolved, max_bytes) {
            Some((content, truncated)) => files.push(RelevantFile {
                path: relative,
                content,
                truncated,
            }),
            None => debug!("Skipping unreadable file {}", resolved.display()),
        }
    }
    files
}

fn read_bounded(path: &Path, max_bytes: usize) -> Option<(String, bool)> {
    let content = std::fs::read_to_string(path).ok()?;
    if content.len() <= max_bytes {
        return Some((content, false));
    }
    let mut end = max_bytes;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    Some((format!("{}\n... (truncated)", &content[..end]), true))
}
