//! Patch Applier - applies proposed fixes to files in a checkout.
//!
//! A proposal is validated against the file as it is now, never applied
//! blindly: range edits must still find their anchor text, and targets must
//! resolve inside the checkout. Writes are atomic, so a rejected or
//! interrupted edit leaves the file byte-for-byte unchanged.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkout::{Checkout, write_atomic};
use crate::properties::{PropertyError, set_property_in_file};

/// The change a proposal makes to its target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Edit {
    /// Replace the whole file
    ReplaceFile { content: String },
    /// Replace `anchor`, the snippet the proposal was computed against
    ReplaceRange {
        anchor: String,
        replacement: String,
        /// 1-based line on which the anchor starts, if known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<usize>,
    },
    /// Assign a key in a properties file
    SetProperty { key: String, value: String },
}

impl Edit {
    /// Short name used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Edit::ReplaceFile { .. } => "replace_file",
            Edit::ReplaceRange { .. } => "replace_range",
            Edit::SetProperty { .. } => "set_property",
        }
    }
}

/// An edit suggested by the fix advisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFix {
    /// Path relative to the checkout root
    pub target_file: PathBuf,
    pub edit: Edit,
    pub rationale: String,
}

impl ProposedFix {
    pub fn new(target_file: impl Into<PathBuf>, edit: Edit, rationale: impl Into<String>) -> Self {
        Self {
            target_file: target_file.into(),
            edit,
            rationale: rationale.into(),
        }
    }

    /// Full-file replacement
    pub fn replace_file(
        target_file: impl Into<PathBuf>,
        content: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self::new(
            target_file,
            Edit::ReplaceFile {
                content: content.into(),
            },
            rationale,
        )
    }

    /// Anchored range replacement
    pub fn replace_range(
        target_file: impl Into<PathBuf>,
        anchor: impl Into<String>,
        replacement: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self::new(
            target_file,
            Edit::ReplaceRange {
                anchor: anchor.into(),
                replacement: replacement.into(),
                line: None,
            },
            rationale,
        )
    }

    /// Property assignment
    pub fn set_property(
        target_file: impl Into<PathBuf>,
        key: impl Into<String>,
        value: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self::new(
            target_file,
            Edit::SetProperty {
                key: key.into(),
                value: value.into(),
            },
            rationale,
        )
    }

    /// Pin a range replacement to the line its anchor starts on.
    pub fn at_line(mut self, line: usize) -> Self {
        if let Edit::ReplaceRange { line: l, .. } = &mut self.edit {
            *l = Some(line);
        }
        self
    }
}

impl fmt::Display for ProposedFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.edit.kind(), self.target_file.display())
    }
}

/// Errors from applying a proposal
#[derive(Debug, Error)]
pub enum PatchError {
    /// Target does not exist inside the checkout
    #[error("Target not found: {0}")]
    TargetNotFound(PathBuf),

    /// The file no longer matches what the proposal expects, or the edit is malformed
    #[error("Edit conflict in {target}: {reason}")]
    EditConflict { target: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PatchError {
    /// Whether the proposal was rejected, as opposed to the filesystem failing
    pub fn is_rejection(&self) -> bool {
        matches!(self, PatchError::TargetNotFound(_) | PatchError::EditConflict { .. })
    }

    fn conflict(target: &Path, reason: impl Into<String>) -> Self {
        PatchError::EditConflict {
            target: target.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Record of an applied proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedPatch {
    /// Target relative to the checkout root
    pub target: PathBuf,
    pub kind: &'static str,
    /// Whether the file content actually changed
    pub changed: bool,
}

/// Applies proposals to a checkout
#[derive(Debug, Clone, Default)]
pub struct PatchApplier;

impl PatchApplier {
    pub fn new() -> Self {
        Self
    }

    /// Validate and apply `fix`.
    pub fn apply(&self, checkout: &Checkout, fix: &ProposedFix) -> Result<AppliedPatch, PatchError> {
        let target = checkout
            .resolve(&fix.target_file)
            .filter(|p| p.is_file())
            .ok_or_else(|| PatchError::TargetNotFound(fix.target_file.clone()))?;
        let relative = checkout.relativize(&target);

        debug!("Applying {} ({})", fix, fix.rationale);

        let changed = match &fix.edit {
            Edit::ReplaceFile { content } => {
                let before = fs::read(&target)?;
                write_checked(&target, &relative, content.as_bytes())?;
                before != content.as_bytes()
            }
            Edit::ReplaceRange {
                anchor,
                replacement,
                line,
            } => {
                let content = read_text(&target, &relative)?;
                let start = locate_anchor(&content, anchor, *line).map_err(|reason| PatchError::conflict(&relative, reason))?;
                let mut updated = String::with_capacity(content.len() + replacement.len());
                updated.push_str(&content[..start]);
                updated.push_str(replacement);
                updated.push_str(&content[start + anchor.len()..]);
                write_checked(&target, &relative, updated.as_bytes())?;
                updated != content
            }
            Edit::SetProperty { key, value } => {
                let update = set_property_in_file(&target, key, value).map_err(|e| match e {
                    PropertyError::FileNotFound(_) => PatchError::TargetNotFound(relative.clone()),
                    PropertyError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                        PatchError::conflict(&relative, "target is not writable")
                    }
                    PropertyError::Io(io) => PatchError::Io(io),
                    other => PatchError::conflict(&relative, other.to_string()),
                })?;
                update.previous.as_deref() != Some(value.as_str())
            }
        };

        if changed {
            info!("Applied {} to {}", fix.edit.kind(), relative.display());
        } else {
            warn!("{} on {} left the file unchanged", fix.edit.kind(), relative.display());
        }

        Ok(AppliedPatch {
            target: relative,
            kind: fix.edit.kind(),
            changed,
        })
    }
}

fn read_text(target: &Path, relative: &Path) -> Result<String, PatchError> {
    let bytes = fs::read(target)?;
    String::from_utf8(bytes).map_err(|_| PatchError::conflict(relative, "target is not UTF-8 text"))
}

fn write_checked(target: &Path, relative: &Path, content: &[u8]) -> Result<(), PatchError> {
    match write_atomic(target, content) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(PatchError::conflict(relative, "target is not writable"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Byte offset of the anchor occurrence the edit refers to.
fn locate_anchor(content: &str, anchor: &str, line: Option<usize>) -> Result<usize, String> {
    if anchor.is_empty() {
        return Err("anchor text is empty".to_string());
    }

    let starts: Vec<usize> = content.match_indices(anchor).map(|(i, _)| i).collect();

    match line {
        Some(line) => {
            let (line_start, line_end) = line_span(content, line)
                .ok_or_else(|| format!("line {} is beyond the end of the file", line))?;
            starts
                .into_iter()
                .find(|&s| s >= line_start && s < line_end.max(line_start + 1))
                .ok_or_else(|| format!("anchor no longer matches at line {}", line))
        }
        None => match starts.as_slice() {
            [] => Err("anchor text not found".to_string()),
            [only] => Ok(*only),
            many => Err(format!(
                "anchor text matches {} locations; a line is required",
                many.len()
            )),
        },
    }
}

/// Byte span `[start, end)` of the 1-based `line`, terminator included.
fn line_span(content: &str, line: usize) -> Option<(usize, usize)> {
    if line == 0 {
        return None;
    }
    let mut offset = 0;
    for (idx, raw) in content.split_inclusive('\n').enumerate() {
        if idx + 1 == line {
            return Some((offset, offset + raw.len()));
        }
        offset += raw.len();
    }
    None
}
