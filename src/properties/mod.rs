//! Property Editor - reads and writes the build's key-value configuration file.
//!
//! Edits never drop or reorder unrelated lines; see [`PropertyFile`].

mod file;

pub use file::{ParseError, PropertyFile};

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::checkout::{Checkout, write_atomic};

/// Default Gradle property file name
pub const DEFAULT_PROPERTY_FILE: &str = "gradle.properties";

/// Errors from property editing
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("Property file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Malformed property file {path} at line {line}: {reason}")]
    MalformedFile { path: PathBuf, line: usize, reason: String },

    #[error("Invalid property key '{0}'")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a successful property assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyUpdate {
    pub key: String,
    /// Value before the edit, `None` if the key was appended
    pub previous: Option<String>,
    pub value: String,
    /// Number of entries rewritten in place
    pub replaced: usize,
}

/// Edits one properties file inside a checkout
#[derive(Debug, Clone)]
pub struct PropertyEditor {
    file_name: PathBuf,
}

impl Default for PropertyEditor {
    fn default() -> Self {
        Self::new(DEFAULT_PROPERTY_FILE)
    }
}

impl PropertyEditor {
    /// Create an editor for `file_name`, relative to the checkout root
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Property file path relative to the checkout
    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    /// Set `key` to `value` in the checkout's property file.
    pub fn set(&self, checkout: &Checkout, key: &str, value: &str) -> Result<PropertyUpdate, PropertyError> {
        set_property_in_file(&checkout.join(&self.file_name), key, value)
    }

    /// Read the current value of `key`, `Ok(None)` if absent.
    pub fn get(&self, checkout: &Checkout, key: &str) -> Result<Option<String>, PropertyError> {
        let file = load(&checkout.join(&self.file_name))?;
        Ok(file.get(key).map(str::to_string))
    }
}

/// Set `key` to `value` in the properties file at `path`, atomically.
pub fn set_property_in_file(path: &Path, key: &str, value: &str) -> Result<PropertyUpdate, PropertyError> {
    if key.trim().is_empty() || key.contains(['\n', '\r']) {
        return Err(PropertyError::InvalidKey(key.to_string()));
    }

    let mut file = load(path)?;
    let previous = file.get(key).map(str::to_string);
    let replaced = file.set(key, value);

    write_atomic(path, file.to_string().as_bytes())?;

    if replaced == 0 {
        info!("Appended {}={} to {}", key, value, path.display());
    } else {
        info!(
            "Set {}={} in {} (was {:?}, {} entr{})",
            key,
            value,
            path.display(),
            previous,
            replaced,
            if replaced == 1 { "y" } else { "ies" }
        );
    }

    Ok(PropertyUpdate {
        key: key.to_string(),
        previous,
        value: value.to_string(),
        replaced,
    })
}

/// Load and parse a properties file.
pub fn load(path: &Path) -> Result<PropertyFile, PropertyError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PropertyError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let text = String::from_utf8(bytes).map_err(|e| {
        let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
        PropertyError::MalformedFile {
            path: path.to_path_buf(),
            line: valid.iter().filter(|&&b| b == b'\n').count() + 1,
            reason: "not valid UTF-8".to_string(),
        }
    })?;

    debug!("Parsing {} ({} bytes)", path.display(), text.len());
    PropertyFile::parse(&text).map_err(|e| PropertyError::MalformedFile {
        path: path.to_path_buf(),
        line: e.line,
        reason: e.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkout_with(props: &[u8]) -> (TempDir, Checkout) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DEFAULT_PROPERTY_FILE), props).unwrap();
        let checkout = Checkout::open(dir.path()).unwrap();
        (dir, checkout)
    }

    #[test]
    fn test_set_existing_key() {
        let (_dir, checkout) = checkout_with(b"# deps\ndepVersion=1.0\nother=x\n");
        let editor = PropertyEditor::default();

        let update = editor.set(&checkout, "depVersion", "2.0").unwrap();
        assert_eq!(update.previous.as_deref(), Some("1.0"));
        assert_eq!(update.replaced, 1);

        let content = fs::read_to_string(checkout.join(DEFAULT_PROPERTY_FILE)).unwrap();
        assert_eq!(content, "# deps\ndepVersion=2.0\nother=x\n");
    }

    #[test]
    fn test_set_preserves_unrelated_lines_verbatim() {
        let original = "#comment  with trailing spaces   \n\n  indented.key   =   keep me  \nweird\\:key=v\ntarget=old\n! bang\n";
        let (_dir, checkout) = checkout_with(original.as_bytes());

        PropertyEditor::default().set(&checkout, "target", "new").unwrap();

        let content = fs::read_to_string(checkout.join(DEFAULT_PROPERTY_FILE)).unwrap();
        let before: Vec<&str> = original.lines().collect();
        let after: Vec<&str> = content.lines().collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            if b.starts_with("target=") {
                assert_eq!(*a, "target=new");
            } else {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_set_appends_absent_key() {
        let (_dir, checkout) = checkout_with(b"a=1\n");
        let update = PropertyEditor::default().set(&checkout, "depVersion", "2.0").unwrap();
        assert_eq!(update.previous, None);
        assert_eq!(update.replaced, 0);
        assert_eq!(
            fs::read_to_string(checkout.join(DEFAULT_PROPERTY_FILE)).unwrap(),
            "a=1\ndepVersion=2.0\n"
        );
    }

    #[test]
    fn test_file_not_found() {
        let dir = TempDir::new().unwrap();
        let checkout = Checkout::open(dir.path()).unwrap();
        let result = PropertyEditor::default().set(&checkout, "k", "v");
        assert!(matches!(result, Err(PropertyError::FileNotFound(_))));
        assert!(!dir.path().join(DEFAULT_PROPERTY_FILE).exists());
    }

    #[test]
    fn test_malformed_file_left_untouched() {
        let original = b"a=1\nthis line is fine\n=broken\n";
        let (_dir, checkout) = checkout_with(original);

        let err = PropertyEditor::default().set(&checkout, "a", "2").unwrap_err();
        match err {
            PropertyError::MalformedFile { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read(checkout.join(DEFAULT_PROPERTY_FILE)).unwrap(), original);
    }

    #[test]
    fn test_non_utf8_is_malformed() {
        let (_dir, checkout) = checkout_with(b"a=1\nb=\xff\xfe\n");
        let err = PropertyEditor::default().set(&checkout, "a", "2").unwrap_err();
        match err {
            PropertyError::MalformedFile { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_key() {
        let (_dir, checkout) = checkout_with(b"a=1\n");
        let editor = PropertyEditor::default();
        assert!(matches!(editor.set(&checkout, "  ", "v"), Err(PropertyError::InvalidKey(_))));
        assert!(matches!(editor.set(&checkout, "a\nb", "v"), Err(PropertyError::InvalidKey(_))));
    }

    #[test]
    fn test_get() {
        let (_dir, checkout) = checkout_with(b"depVersion=1.0\n");
        let editor = PropertyEditor::default();
        assert_eq!(editor.get(&checkout, "depVersion").unwrap().as_deref(), Some("1.0"));
        assert_eq!(editor.get(&checkout, "nope").unwrap(), None);
    }

    #[test]
    fn test_custom_file_name() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/local.properties"), "sdk.dir=/opt/sdk\n").unwrap();
        let checkout = Checkout::open(dir.path()).unwrap();

        let editor = PropertyEditor::new("app/local.properties");
        assert_eq!(editor.file_name(), Path::new("app/local.properties"));
        editor.set(&checkout, "sdk.dir", "/usr/lib/sdk").unwrap();
        assert_eq!(editor.get(&checkout, "sdk.dir").unwrap().as_deref(), Some("/usr/lib/sdk"));
    }
}
