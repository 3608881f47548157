//! Task enumeration
//!
//! Lists candidate archive files under a root directory. Enumeration runs
//! before anything is dispatched; if the root cannot be read the run never
//! starts.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::framework::parser::ArchiveParser;
use crate::framework::types::TaskUnit;

/// Extensions picked up when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["pst", "mbox"];

/// Supplies the task units for a run
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<TaskUnit>>;
}

/// Recursive filesystem walk matching file extensions case-insensitively
#[derive(Debug, Clone)]
pub struct FsTaskSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsTaskSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// List only the files `parser` can read
    ///
    /// Falls back to [`DEFAULT_EXTENSIONS`] when the parser names none.
    pub fn for_parser(root: impl Into<PathBuf>, parser: &dyn ArchiveParser) -> Self {
        let source = Self::new(root);
        match parser.extensions() {
            [] => source,
            extensions => source.with_extensions(extensions),
        }
    }

    /// Replace the matched extensions (with or without the leading dot)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    fn walk(&self) -> Result<Vec<TaskUnit>> {
        let root_display = self.root.display().to_string();
        let metadata = std::fs::metadata(&self.root)
            .map_err(|e| IngestError::enumeration(&root_display, e.to_string()))?;
        if !metadata.is_dir() {
            return Err(IngestError::enumeration(root_display, "not a directory"));
        }

        let mut units = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The root itself failing is fatal; anything below it is skipped.
                    if e.depth() == 0 {
                        return Err(IngestError::enumeration(root_display, e.to_string()));
                    }
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                },
            };

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) => {
                    debug!(path = %entry.path().display(), size_bytes = meta.len(), "Found archive");
                    units.push(TaskUnit::new(entry.path().to_string_lossy(), meta.len()));
                },
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Skipping file without metadata"),
            }
        }

        units.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(units)
    }
}

#[async_trait]
impl TaskSource for FsTaskSource {
    async fn enumerate(&self) -> Result<Vec<TaskUnit>> {
        let source = self.clone();
        let units = tokio::task::spawn_blocking(move || source.walk())
            .await
            .map_err(|e| IngestError::enumeration(self.root.display().to_string(), e.to_string()))??;

        info!(
            root = %self.root.display(),
            files = units.len(),
            total_bytes = units.iter().map(|u| u.size_bytes).sum::<u64>(),
            "Enumerated archive files"
        );
        Ok(units)
    }
}
