use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::repo::TagRepository;
use crate::error::{Result, ScopeError};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Portable copy of every tag and its folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Zero when the file carries no version at all.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<PathBuf>>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Folders that no longer exist on this machine.
    pub skipped: Vec<PathBuf>,
    pub failed: usize,
}

pub fn export(repo: &TagRepository<'_>) -> Result<Snapshot> {
    let mut tags = BTreeMap::new();
    for name in repo.list_tags()?.into_keys() {
        let folders = repo.list_folders_by_tag(&name)?;
        tags.insert(name, folders);
    }
    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        tags,
    })
}

pub fn to_yaml(snapshot: &Snapshot) -> Result<String> {
    Ok(serde_yaml::to_string(snapshot)?)
}

pub fn from_yaml(content: &str) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_yaml::from_str(content)?;
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            "Snapshot version {} differs from {}, importing anyway",
            snapshot.version, SNAPSHOT_VERSION
        );
    }
    Ok(snapshot)
}

/// Adds every (folder, tag) pair. Missing folders are skipped and reported;
/// other per-pair failures are logged and counted.
pub fn import(repo: &TagRepository<'_>, snapshot: &Snapshot) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for (tag, folders) in &snapshot.tags {
        for folder in folders {
            match repo.add_tag(folder, tag) {
                Ok(()) => summary.imported += 1,
                Err(ScopeError::FolderNotFound(path)) => {
                    warn!("Skipping non-existent folder: {:?}", path);
                    summary.skipped.push(path);
                }
                Err(e) => {
                    warn!("Failed to add tag '{}' to {:?}: {}", tag, folder, e);
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        "Imported {} tag assignments ({} skipped, {} failed)",
        summary.imported,
        summary.skipped.len(),
        summary.failed
    );
    summary
}
