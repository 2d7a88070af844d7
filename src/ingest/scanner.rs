use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::database::repo::TagRepository;
use crate::error::{Result, ScopeError};

pub const SCOPE_FILE_NAME: &str = ".scope";

/// Contents of a `.scope` file.
#[derive(Debug, Default, Deserialize)]
pub struct ScopeFile {
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredScope {
    /// Directory holding the `.scope` file.
    pub folder: PathBuf,
    pub file: PathBuf,
    pub tags: Vec<String>,
}

/// A `.scope` file that could not be read or parsed. Never fatal to a scan.
#[derive(Debug, Clone)]
pub struct ScanIssue {
    pub file: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub scopes: Vec<DiscoveredScope>,
    pub issues: Vec<ScanIssue>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub failed: usize,
}

pub fn parse_scope_file(path: &Path) -> Result<ScopeFile> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(ScopeFile::default());
    }

    let mut file: ScopeFile = serde_yaml::from_str(&content)?;
    file.tags = file
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(file)
}

/// Walks `root` for `.scope` files, skipping hidden directories below the root
/// and anything that cannot be read.
pub fn scan_directory(root: &Path) -> Result<ScanReport> {
    if !root.is_dir() {
        return Err(ScopeError::FolderNotFound(root.to_path_buf()));
    }

    let mut report = ScanReport::default();
    let walker = WalkDir::new(root).into_iter();

    for entry in walker.filter_entry(|e| !is_hidden_dir(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || entry.file_name() != SCOPE_FILE_NAME {
            continue;
        }

        let file = entry.path().to_path_buf();
        match parse_scope_file(&file) {
            Ok(parsed) if parsed.tags.is_empty() => debug!("No tags in {:?}", file),
            Ok(parsed) => {
                let folder = file.parent().unwrap_or(root).to_path_buf();
                report.scopes.push(DiscoveredScope {
                    folder,
                    file,
                    tags: parsed.tags,
                });
            }
            Err(e) => report.issues.push(ScanIssue {
                file,
                error: e.to_string(),
            }),
        }
    }

    Ok(report)
}

/// Tags every discovered folder with each of its tags, one `add_tag` per pair.
pub fn apply_scopes(repo: &TagRepository<'_>, scopes: &[DiscoveredScope]) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for scope in scopes {
        for tag in &scope.tags {
            match repo.add_tag(&scope.folder, tag) {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    warn!(
                        "Failed to add tag '{}' from {:?} to {:?}: {}",
                        tag, scope.file, scope.folder, e
                    );
                    summary.failed += 1;
                }
            }
        }
    }
    summary
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}
