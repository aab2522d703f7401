//! Loading documents from the filesystem.
//!
//! [`DocumentLoader`] reads plain text and markdown files into [`Document`]s with
//! content-addressed identifiers and filesystem metadata. Directory loads never
//! abort on a single bad file: failures are logged and reported next to the
//! documents that did load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{Document, Metadata, SOURCE_KEY};
use crate::error::{RagError, Result};

/// Extensions the loader understands, without the leading dot.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// A file that could not be loaded during a directory scan.
#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    /// Path of the failed file.
    pub path: PathBuf,
    /// Rendered error message.
    pub error: String,
}

/// Outcome of [`DocumentLoader::load_directory`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Successfully loaded documents, ordered by path.
    pub documents: Vec<Document>,
    /// Files that failed to load.
    pub failures: Vec<LoadFailure>,
}

/// Reads supported files into [`Document`]s.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader;

fn extension_of(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).unwrap_or_default()
}

fn file_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        "txt" => Some("text"),
        "md" | "markdown" => Some("markdown"),
        _ => None,
    }
}

fn rfc3339(time: std::io::Result<SystemTime>) -> Option<Value> {
    time.ok().map(|t| Value::String(DateTime::<Utc>::from(t).to_rfc3339()))
}

impl DocumentLoader {
    /// Create a new loader.
    pub fn new() -> Self {
        Self
    }

    /// Load a single file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedFileType`] for extensions outside
    /// [`SUPPORTED_EXTENSIONS`] and [`RagError::Io`] if the file cannot be read.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        let extension = extension_of(path);
        let file_type = file_type_for(&extension).ok_or_else(|| RagError::UnsupportedFileType {
            extension: extension.clone(),
            supported: SUPPORTED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        })?;

        let content = fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
        let fs_meta = fs::metadata(path).map_err(|e| RagError::io(path, e))?;

        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), path.display().to_string().into());
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            metadata.insert("file_name".to_string(), name.into());
        }
        metadata.insert("file_type".to_string(), file_type.into());
        metadata.insert("extension".to_string(), extension.into());
        metadata.insert("size_bytes".to_string(), fs_meta.len().into());
        if let Some(created) = rfc3339(fs_meta.created()) {
            metadata.insert("created_at".to_string(), created);
        }
        if let Some(modified) = rfc3339(fs_meta.modified()) {
            metadata.insert("modified_at".to_string(), modified);
        }

        let document = Document::new(content, metadata);
        debug!(document.id = %document.id, path = %path.display(), "loaded document");
        Ok(document)
    }

    /// Load every matching file under `dir`.
    ///
    /// `extensions` restricts the scan (case-insensitive, no leading dot); `None`
    /// means all [`SUPPORTED_EXTENSIONS`]. Files are visited in path order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] only if `dir` itself is not a readable directory.
    pub fn load_directory(
        &self,
        dir: impl AsRef<Path>,
        recursive: bool,
        extensions: Option<&[&str]>,
    ) -> Result<LoadReport> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(RagError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let wanted: Vec<String> = extensions
            .unwrap_or(&SUPPORTED_EXTENSIONS)
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let walker = WalkDir::new(dir).min_depth(1).max_depth(if recursive { usize::MAX } else { 1 });
        let mut paths = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if wanted.contains(&extension_of(entry.path())) {
                        paths.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping unreadable directory entry"),
            }
        }
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            match self.load(&path) {
                Ok(document) => report.documents.push(document),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load document");
                    report.failures.push(LoadFailure { path, error: e.to_string() });
                }
            }
        }

        info!(
            dir = %dir.display(),
            loaded = report.documents.len(),
            failed = report.failures.len(),
            "loaded directory"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_attaches_filesystem_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("guide.md");
        fs::write(&path, "# Guide\n\nHello.").unwrap();

        let doc = DocumentLoader::new().load(&path).unwrap();
        assert_eq!(doc.content, "# Guide\n\nHello.");
        assert_eq!(doc.metadata["file_type"], "markdown");
        assert_eq!(doc.metadata["file_name"], "guide.md");
        assert_eq!(doc.metadata["size_bytes"], 15);
        assert!(doc.metadata.contains_key("modified_at"));
        assert_eq!(doc.source(), Some(path.display().to_string().as_str()));
    }

    #[test]
    fn unsupported_extension_names_supported_set() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("data.csv");
        fs::write(&path, "a,b").unwrap();

        let err = DocumentLoader::new().load(&path).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFileType { ref extension, .. } if extension == "csv"));
        let message = err.to_string();
        assert!(message.contains("txt") && message.contains("md"));
    }

    #[test]
    fn identical_files_share_doc_id() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "same bytes").unwrap();
        fs::write(temp.path().join("b.txt"), "same bytes").unwrap();
        fs::write(temp.path().join("c.txt"), "other bytes").unwrap();

        let loader = DocumentLoader::new();
        let a = loader.load(temp.path().join("a.txt")).unwrap();
        let b = loader.load(temp.path().join("b.txt")).unwrap();
        let c = loader.load(temp.path().join("c.txt")).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn directory_load_continues_past_failures() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.txt"), "first").unwrap();
        fs::write(root.join("nested/b.md"), "second").unwrap();
        fs::write(root.join("skip.csv"), "ignored").unwrap();
        // Invalid UTF-8 cannot be read as text.
        fs::write(root.join("broken.txt"), [0xff, 0xfe, 0xfd]).unwrap();

        let loader = DocumentLoader::new();
        let flat = loader.load_directory(root, false, None).unwrap();
        assert_eq!(flat.documents.len(), 1);
        assert_eq!(flat.failures.len(), 1);
        assert!(flat.failures[0].path.ends_with("broken.txt"));

        let deep = loader.load_directory(root, true, None).unwrap();
        assert_eq!(deep.documents.len(), 2);

        let only_md = loader.load_directory(root, true, Some(&[".MD"][..])).unwrap();
        assert_eq!(only_md.documents.len(), 1);
        assert!(only_md.failures.is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = DocumentLoader::new().load_directory(temp.path().join("nope"), true, None);
        assert!(matches!(err, Err(RagError::Io { .. })));
    }
}
