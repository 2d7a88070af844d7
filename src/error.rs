use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("database not initialized")]
    StoreNotInitialized,

    #[error("folder does not exist: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    /// `folder_tracked` is false when the path has never been tagged at all.
    #[error("{}", association_message(.path, .tag, .folder_tracked))]
    AssociationNotFound {
        path: PathBuf,
        tag: String,
        folder_tracked: bool,
    },

    #[error("no folders found with tag: {0}")]
    NoFoldersFound(String),

    #[error("invalid {0}: must not be empty")]
    InvalidName(&'static str),

    #[error("failed to run shell: {0}")]
    ShellLaunch(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn association_message(path: &std::path::Path, tag: &str, folder_tracked: &bool) -> String {
    if *folder_tracked {
        format!("tag '{}' not found on folder: {}", tag, path.display())
    } else {
        format!("folder is not tracked: {} (tag '{}')", path.display(), tag)
    }
}

pub type Result<T> = std::result::Result<T, ScopeError>;
