use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::store::Store;
use crate::error::{Result, ScopeError};

/// Folders whose path vanished from disk, found (and unless `dry_run`, removed)
/// by [`TagRepository::prune`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub removed_folders: Vec<PathBuf>,
    pub removed_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    pub total_tags: usize,
    pub total_folders: usize,
    pub total_associations: usize,
    /// Tags with no folders.
    pub orphaned_tags: Vec<String>,
    /// Tracked folders that no longer exist on disk.
    pub missing_folders: Vec<PathBuf>,
}

/// Reads and writes the folder/tag mapping. Holds no state of its own.
pub struct TagRepository<'a> {
    store: &'a Store,
}

impl<'a> TagRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Tags `path`, creating the folder and tag rows on first use.
    /// Re-adding an existing association is a no-op.
    pub fn add_tag(&self, path: &Path, tag: &str) -> Result<()> {
        let path_text = path_text(path)?;
        validate_name(tag, "tag name")?;
        if is_missing(path)? {
            return Err(ScopeError::FolderNotFound(path.to_path_buf()));
        }

        let mut conn = self.store.handle()?;
        let tx = conn.transaction()?;
        let now = now();

        let folder_id = match find_folder_id(&tx, &path_text)? {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO folders (path, created_at) VALUES (?1, ?2)",
                    params![path_text, now],
                )?;
                debug!("Tracking new folder {}", path_text);
                tx.last_insert_rowid()
            }
        };

        let tag_id = match find_tag_id(&tx, tag)? {
            Some(id) => id,
            None => insert_tag(&tx, tag, now)?,
        };

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO folder_tags (folder_id, tag_id, created_at) VALUES (?1, ?2, ?3)",
            params![folder_id, tag_id, now],
        )?;
        tx.commit()?;

        if inserted == 0 {
            debug!("{} already tagged '{}'", path_text, tag);
        } else {
            info!("Tagged {} with '{}'", path_text, tag);
        }
        Ok(())
    }

    pub fn remove_tag(&self, path: &Path, tag: &str) -> Result<()> {
        let path_text = path.to_string_lossy().into_owned();
        let conn = self.store.handle()?;

        let removed = conn.execute(
            "DELETE FROM folder_tags
             WHERE folder_id = (SELECT id FROM folders WHERE path = ?1)
             AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
            params![path_text, tag],
        )?;

        if removed == 0 {
            let folder_tracked = find_folder_id(&conn, &path_text)?.is_some();
            return Err(ScopeError::AssociationNotFound {
                path: path.to_path_buf(),
                tag: tag.to_string(),
                folder_tracked,
            });
        }

        info!("Removed tag '{}' from {}", tag, path_text);
        Ok(())
    }

    /// Deletes the tag and, through the cascade, every association to it.
    pub fn delete_tag(&self, tag: &str) -> Result<()> {
        let conn = self.store.handle()?;
        let removed = conn.execute("DELETE FROM tags WHERE name = ?1", params![tag])?;
        if removed == 0 {
            return Err(ScopeError::TagNotFound(tag.to_string()));
        }
        info!("Deleted tag '{}'", tag);
        Ok(())
    }

    /// Renames in place. Never merges: an existing `new_name` is an error.
    pub fn rename_tag(&self, old_name: &str, new_name: &str) -> Result<()> {
        validate_name(new_name, "tag name")?;

        let mut conn = self.store.handle()?;
        let tx = conn.transaction()?;

        let old_id = find_tag_id(&tx, old_name)?
            .ok_or_else(|| ScopeError::TagNotFound(old_name.to_string()))?;
        if find_tag_id(&tx, new_name)?.is_some() {
            return Err(ScopeError::TagAlreadyExists(new_name.to_string()));
        }

        tx.execute(
            "UPDATE tags SET name = ?1 WHERE id = ?2",
            params![new_name, old_id],
        )?;
        tx.commit()?;

        info!("Renamed tag '{}' to '{}'", old_name, new_name);
        Ok(())
    }

    /// Moves every folder of `src` onto `dst` (created if absent), then drops `src`.
    /// Returns how many folders were moved. A folder whose association insert
    /// fails is skipped and not counted.
    pub fn merge_tag(&self, src: &str, dst: &str) -> Result<usize> {
        validate_name(dst, "tag name")?;

        let mut conn = self.store.handle()?;
        let tx = conn.transaction()?;

        let src_id =
            find_tag_id(&tx, src)?.ok_or_else(|| ScopeError::TagNotFound(src.to_string()))?;
        if src == dst {
            debug!("Merge of '{}' into itself, nothing to do", src);
            return Ok(0);
        }

        let now = now();
        let dst_id = match find_tag_id(&tx, dst)? {
            Some(id) => id,
            None => insert_tag(&tx, dst, now)?,
        };

        let folder_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT ft.folder_id FROM folder_tags ft
                 JOIN folders f ON f.id = ft.folder_id
                 WHERE ft.tag_id = ?1
                 ORDER BY f.path",
            )?;
            let rows = stmt.query_map(params![src_id], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut moved = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO folder_tags (folder_id, tag_id, created_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for folder_id in folder_ids {
                match stmt.execute(params![folder_id, dst_id, now]) {
                    Ok(_) => moved += 1,
                    Err(e) => warn!("Skipping folder {} while merging '{}': {}", folder_id, src, e),
                }
            }
        }

        tx.execute("DELETE FROM tags WHERE id = ?1", params![src_id])?;
        tx.commit()?;

        info!("Merged tag '{}' into '{}' ({} folders)", src, dst, moved);
        Ok(moved)
    }

    /// Creates `new_name` with the same folder set as `src`. Returns the number
    /// of associations copied.
    pub fn clone_tag(&self, src: &str, new_name: &str) -> Result<usize> {
        validate_name(new_name, "tag name")?;

        let mut conn = self.store.handle()?;
        let tx = conn.transaction()?;

        let src_id =
            find_tag_id(&tx, src)?.ok_or_else(|| ScopeError::TagNotFound(src.to_string()))?;
        if find_tag_id(&tx, new_name)?.is_some() {
            return Err(ScopeError::TagAlreadyExists(new_name.to_string()));
        }

        let now = now();
        let new_id = insert_tag(&tx, new_name, now)?;
        let copied = tx.execute(
            "INSERT INTO folder_tags (folder_id, tag_id, created_at)
             SELECT folder_id, ?1, ?2 FROM folder_tags WHERE tag_id = ?3",
            params![new_id, now, src_id],
        )?;
        tx.commit()?;

        info!("Cloned tag '{}' to '{}' ({} folders)", src, new_name, copied);
        Ok(copied)
    }

    /// Every tag with its folder count, including tags with zero folders.
    pub fn list_tags(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.store.handle()?;
        let mut stmt = conn.prepare(
            "SELECT t.name, COUNT(ft.folder_id)
             FROM tags t
             LEFT JOIN folder_tags ft ON t.id = ft.tag_id
             GROUP BY t.id, t.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut tags = BTreeMap::new();
        for row in rows {
            let (name, count) = row?;
            tags.insert(name, count);
        }
        Ok(tags)
    }

    pub fn list_folders_by_tag(&self, tag: &str) -> Result<Vec<PathBuf>> {
        let conn = self.store.handle()?;
        query_paths(
            &conn,
            "SELECT f.path
             FROM folders f
             JOIN folder_tags ft ON f.id = ft.folder_id
             JOIN tags t ON ft.tag_id = t.id
             WHERE t.name = ?1
             ORDER BY f.path",
            params![tag],
        )
    }

    /// Deduplicated union of the folders of every tag in `tags`, in the same
    /// byte order of the stored path as [`Self::list_folders_by_tag`].
    pub fn list_folders_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<PathBuf>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; tags.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT f.path
             FROM folders f
             JOIN folder_tags ft ON f.id = ft.folder_id
             JOIN tags t ON ft.tag_id = t.id
             WHERE t.name IN ({})
             ORDER BY f.path",
            placeholders
        );

        let names: Vec<&str> = tags.iter().map(|t| t.as_ref()).collect();
        let conn = self.store.handle()?;
        query_paths(&conn, &sql, params_from_iter(names))
    }

    /// Tags on `path`, sorted. Unknown paths yield an empty list.
    pub fn get_tags_for_folder(&self, path: &Path) -> Result<Vec<String>> {
        let conn = self.store.handle()?;
        let mut stmt = conn.prepare(
            "SELECT t.name
             FROM tags t
             JOIN folder_tags ft ON t.id = ft.tag_id
             JOIN folders f ON ft.folder_id = f.id
             WHERE f.path = ?1
             ORDER BY t.name",
        )?;
        let rows = stmt.query_map(params![path.to_string_lossy().into_owned()], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Folders carrying at least one tag.
    pub fn list_all_folders(&self) -> Result<Vec<PathBuf>> {
        let conn = self.store.handle()?;
        query_paths(
            &conn,
            "SELECT DISTINCT f.path
             FROM folders f
             JOIN folder_tags ft ON f.id = ft.folder_id
             ORDER BY f.path",
            [],
        )
    }

    pub fn prune(&self, dry_run: bool) -> Result<PruneReport> {
        let mut conn = self.store.handle()?;
        let stale = stale_folders(&conn)?;

        let report = PruneReport {
            removed_count: stale.len(),
            removed_folders: stale.iter().map(|(_, path)| path.clone()).collect(),
        };

        if dry_run {
            debug!("Prune dry run: {} stale folders", report.removed_count);
            return Ok(report);
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM folders WHERE id = ?1")?;
            for (id, path) in &stale {
                stmt.execute(params![id])?;
                info!("Pruned stale folder {:?}", path);
            }
        }
        tx.commit()?;

        Ok(report)
    }

    /// Read-only health check.
    pub fn doctor(&self) -> Result<DoctorReport> {
        let conn = self.store.handle()?;

        let count = |sql: &str| -> Result<usize> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as usize)
        };

        let total_tags = count("SELECT COUNT(*) FROM tags")?;
        let total_folders = count("SELECT COUNT(*) FROM folders")?;
        let total_associations = count("SELECT COUNT(*) FROM folder_tags")?;

        let orphaned_tags = {
            let mut stmt = conn.prepare(
                "SELECT t.name FROM tags t
                 LEFT JOIN folder_tags ft ON t.id = ft.tag_id
                 WHERE ft.tag_id IS NULL
                 ORDER BY t.name",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<String>, _>>()?
        };

        let missing_folders = stale_folders(&conn)?
            .into_iter()
            .map(|(_, path)| path)
            .collect();

        Ok(DoctorReport {
            total_tags,
            total_folders,
            total_associations,
            orphaned_tags,
            missing_folders,
        })
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn validate_name(value: &str, what: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ScopeError::InvalidName(what));
    }
    Ok(())
}

fn path_text(path: &Path) -> Result<String> {
    let text = path.to_string_lossy().into_owned();
    validate_name(&text, "path")?;
    Ok(text)
}

fn is_missing(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

fn find_folder_id(conn: &Connection, path: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM folders WHERE path = ?1", params![path], |row| row.get(0))
        .optional()?)
}

fn find_tag_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| row.get(0))
        .optional()?)
}

fn insert_tag(conn: &Connection, name: &str, now: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO tags (name, created_at) VALUES (?1, ?2)",
        params![name, now],
    )?;
    debug!("Created tag '{}'", name);
    Ok(conn.last_insert_rowid())
}

fn query_paths<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<PathBuf>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut paths = Vec::new();
    for row in rows {
        paths.push(PathBuf::from(row?));
    }
    Ok(paths)
}

/// Tracked folders whose path is gone. One stat per row, no batching.
fn stale_folders(conn: &Connection) -> Result<Vec<(i64, PathBuf)>> {
    let mut stmt = conn.prepare("SELECT id, path FROM folders ORDER BY path")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    let mut stale = Vec::new();
    for row in rows {
        let (id, path) = row?;
        let path = PathBuf::from(path);
        if is_missing(&path)? {
            stale.push((id, path));
        }
    }
    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    struct TestEnv {
        dir: TempDir,
        store: Store,
    }

    impl TestEnv {
        fn new() -> Result<Self> {
            let dir = TempDir::new()?;
            let store = Store::new(dir.path().join("config").join("scope.db"));
            store.init()?;
            Ok(Self { dir, store })
        }

        fn repo(&self) -> TagRepository<'_> {
            TagRepository::new(&self.store)
        }

        fn folder(&self, name: &str) -> Result<PathBuf> {
            let path = self.dir.path().join(name);
            fs::create_dir_all(&path)?;
            Ok(path)
        }
    }

    #[test]
    fn test_add_tag_and_list_by_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let proj2 = env.folder("proj2")?;
        let proj1 = env.folder("proj1")?;
        let repo = env.repo();

        repo.add_tag(&proj2, "work")?;
        repo.add_tag(&proj1, "work")?;

        assert_eq!(repo.list_folders_by_tag("work")?, vec![proj1.clone(), proj2]);
        assert_eq!(repo.get_tags_for_folder(&proj1)?, vec!["work"]);
        Ok(())
    }

    #[test]
    fn test_add_tag_twice_is_idempotent() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj1")?;
        let repo = env.repo();

        repo.add_tag(&proj, "work")?;
        repo.add_tag(&proj, "work")?;

        assert_eq!(repo.get_tags_for_folder(&proj)?, vec!["work"]);
        assert_eq!(repo.doctor()?.total_associations, 1);
        Ok(())
    }

    #[test]
    fn test_add_tag_rejects_missing_folder() -> Result<()> {
        let env = TestEnv::new()?;
        let missing = env.dir.path().join("does-not-exist");

        let err = env.repo().add_tag(&missing, "work").unwrap_err();
        assert!(matches!(err, ScopeError::FolderNotFound(p) if p == missing));
        assert_eq!(env.repo().doctor()?.total_folders, 0);
        Ok(())
    }

    #[test]
    fn test_add_tag_rejects_empty_names() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj")?;

        assert!(matches!(env.repo().add_tag(&proj, ""), Err(ScopeError::InvalidName(_))));
        assert!(matches!(env.repo().add_tag(&proj, "   "), Err(ScopeError::InvalidName(_))));
        assert!(matches!(env.repo().add_tag(Path::new(""), "x"), Err(ScopeError::InvalidName(_))));
        Ok(())
    }

    #[test]
    fn test_tag_names_are_case_sensitive() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj")?;
        let repo = env.repo();

        repo.add_tag(&proj, "Work")?;
        repo.add_tag(&proj, "work")?;

        assert_eq!(repo.get_tags_for_folder(&proj)?, vec!["Work", "work"]);
        Ok(())
    }

    #[test]
    fn test_repository_requires_initialized_store() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("scope.db"));
        let repo = TagRepository::new(&store);

        assert!(matches!(repo.list_tags(), Err(ScopeError::StoreNotInitialized)));
        assert!(matches!(
            repo.add_tag(dir.path(), "work"),
            Err(ScopeError::StoreNotInitialized)
        ));
    }

    #[test]
    fn test_remove_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj")?;
        let repo = env.repo();

        repo.add_tag(&proj, "work")?;
        repo.add_tag(&proj, "rust")?;
        repo.remove_tag(&proj, "work")?;

        assert_eq!(repo.get_tags_for_folder(&proj)?, vec!["rust"]);
        Ok(())
    }

    #[test]
    fn test_remove_missing_association_is_distinguishable() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj1")?;
        let untracked = env.folder("untracked")?;
        let repo = env.repo();
        repo.add_tag(&proj, "work")?;

        match repo.remove_tag(&proj, "missing-tag") {
            Err(ScopeError::AssociationNotFound { folder_tracked, .. }) => assert!(folder_tracked),
            other => panic!("expected AssociationNotFound, got {:?}", other),
        }
        match repo.remove_tag(&untracked, "work") {
            Err(ScopeError::AssociationNotFound { folder_tracked, .. }) => assert!(!folder_tracked),
            other => panic!("expected AssociationNotFound, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_folder_outlives_its_last_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj")?;
        let repo = env.repo();

        repo.add_tag(&proj, "work")?;
        repo.remove_tag(&proj, "work")?;

        let report = repo.doctor()?;
        assert_eq!(report.total_folders, 1);
        assert_eq!(report.total_associations, 0);
        assert!(repo.list_all_folders()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_delete_tag_cascades() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let repo = env.repo();

        repo.add_tag(&a, "work")?;
        repo.add_tag(&b, "work")?;
        repo.add_tag(&a, "rust")?;
        repo.delete_tag("work")?;

        assert_eq!(repo.get_tags_for_folder(&a)?, vec!["rust"]);
        assert!(repo.get_tags_for_folder(&b)?.is_empty());
        assert!(!repo.list_tags()?.contains_key("work"));
        assert_eq!(repo.doctor()?.total_folders, 2);
        assert_eq!(repo.list_all_folders()?, vec![a]);

        assert!(matches!(repo.delete_tag("work"), Err(ScopeError::TagNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_rename_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let proj = env.folder("proj")?;
        let repo = env.repo();

        repo.add_tag(&proj, "old")?;
        repo.rename_tag("old", "new")?;

        assert_eq!(repo.get_tags_for_folder(&proj)?, vec!["new"]);
        assert!(repo.list_folders_by_tag("old")?.is_empty());
        assert!(matches!(repo.rename_tag("old", "other"), Err(ScopeError::TagNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_rename_never_merges() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let repo = env.repo();

        repo.add_tag(&a, "x")?;
        repo.add_tag(&b, "y")?;

        assert!(matches!(repo.rename_tag("x", "y"), Err(ScopeError::TagAlreadyExists(_))));
        assert_eq!(repo.list_folders_by_tag("x")?, vec![a]);
        assert_eq!(repo.list_folders_by_tag("y")?, vec![b]);
        Ok(())
    }

    #[test]
    fn test_merge_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let repo = env.repo();

        repo.add_tag(&a, "x")?;
        repo.add_tag(&b, "y")?;

        assert_eq!(repo.merge_tag("x", "y")?, 1);
        assert_eq!(repo.list_folders_by_tag("y")?, vec![a, b]);
        assert!(!repo.list_tags()?.contains_key("x"));
        Ok(())
    }

    #[test]
    fn test_merge_keeps_union_with_shared_folders() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let c = env.folder("c")?;
        let repo = env.repo();

        repo.add_tag(&a, "src")?;
        repo.add_tag(&b, "src")?;
        repo.add_tag(&b, "dst")?;
        repo.add_tag(&c, "dst")?;

        repo.merge_tag("src", "dst")?;

        assert_eq!(repo.list_folders_by_tag("dst")?, vec![a, b.clone(), c]);
        assert_eq!(repo.get_tags_for_folder(&b)?, vec!["dst"]);
        Ok(())
    }

    #[test]
    fn test_merge_creates_missing_destination() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let repo = env.repo();

        repo.add_tag(&a, "src")?;
        assert_eq!(repo.merge_tag("src", "fresh")?, 1);

        let tags = repo.list_tags()?;
        assert_eq!(tags.get("fresh"), Some(&1));
        assert!(!tags.contains_key("src"));
        Ok(())
    }

    #[test]
    fn test_merge_missing_source_differs_from_collision() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let repo = env.repo();
        repo.add_tag(&a, "x")?;

        assert!(matches!(repo.merge_tag("nope", "x"), Err(ScopeError::TagNotFound(_))));
        assert!(matches!(repo.clone_tag("nope", "y"), Err(ScopeError::TagNotFound(_))));
        assert!(matches!(repo.clone_tag("x", "x"), Err(ScopeError::TagAlreadyExists(_))));
        Ok(())
    }

    #[test]
    fn test_merge_into_itself_keeps_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let repo = env.repo();
        repo.add_tag(&a, "x")?;

        assert_eq!(repo.merge_tag("x", "x")?, 0);
        assert_eq!(repo.list_folders_by_tag("x")?, vec![a]);
        Ok(())
    }

    #[test]
    fn test_clone_tag() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let repo = env.repo();

        repo.add_tag(&a, "work")?;
        repo.add_tag(&b, "work")?;

        assert_eq!(repo.clone_tag("work", "backup")?, 2);
        assert_eq!(repo.list_folders_by_tag("backup")?, vec![a.clone(), b.clone()]);
        assert_eq!(repo.list_folders_by_tag("work")?, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_list_tags_includes_orphans() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let repo = env.repo();

        repo.add_tag(&a, "work")?;
        repo.add_tag(&a, "temp")?;
        repo.remove_tag(&a, "temp")?;

        let tags = repo.list_tags()?;
        assert_eq!(tags.get("work"), Some(&1));
        assert_eq!(tags.get("temp"), Some(&0));
        assert_eq!(repo.doctor()?.orphaned_tags, vec!["temp"]);
        Ok(())
    }

    #[test]
    fn test_unknown_lookups_are_empty() -> Result<()> {
        let env = TestEnv::new()?;
        let repo = env.repo();

        assert!(repo.list_folders_by_tag("nothing")?.is_empty());
        assert!(repo.get_tags_for_folder(Path::new("/never/tagged"))?.is_empty());
        assert!(repo.list_all_folders()?.is_empty());
        assert!(repo.list_tags()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_folders_for_tags_is_sorted_union() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let c = env.folder("c")?;
        let repo = env.repo();

        repo.add_tag(&c, "x")?;
        repo.add_tag(&a, "x")?;
        repo.add_tag(&a, "y")?;
        repo.add_tag(&b, "y")?;

        assert_eq!(repo.list_folders_for_tags(&["y", "x", "missing"])?, vec![a, b, c]);
        Ok(())
    }

    #[test]
    fn test_union_uses_byte_order_of_paths() -> Result<()> {
        let env = TestEnv::new()?;
        let plain = env.folder("a/x")?;
        let dashed = env.folder("a-/x")?;
        let repo = env.repo();

        repo.add_tag(&plain, "t")?;
        repo.add_tag(&dashed, "t")?;

        // '-' sorts before '/' byte-wise, though `Path` ordering puts "a" first.
        let by_tag = repo.list_folders_by_tag("t")?;
        assert_eq!(by_tag, vec![dashed.clone(), plain.clone()]);
        assert_eq!(repo.list_folders_for_tags(&["t"])?, by_tag);
        assert_eq!(repo.list_folders_for_tags(&["t", "t"])?, by_tag);
        assert!(repo.list_folders_for_tags::<&str>(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_prune_removes_stale_folders() -> Result<()> {
        let env = TestEnv::new()?;
        let keep = env.folder("keep")?;
        let gone = env.folder("gone")?;
        let repo = env.repo();

        repo.add_tag(&keep, "work")?;
        repo.add_tag(&gone, "work")?;
        fs::remove_dir(&gone)?;

        let report = repo.prune(false)?;
        assert_eq!(report.removed_folders, vec![gone.clone()]);
        assert_eq!(report.removed_count, 1);
        assert_eq!(repo.list_all_folders()?, vec![keep]);
        assert_eq!(repo.doctor()?.total_associations, 1);
        Ok(())
    }

    #[test]
    fn test_prune_dry_run_leaves_state() -> Result<()> {
        let env = TestEnv::new()?;
        let gone = env.folder("gone")?;
        let repo = env.repo();

        repo.add_tag(&gone, "work")?;
        fs::remove_dir(&gone)?;

        let before = repo.doctor()?;
        let dry = repo.prune(true)?;
        assert_eq!(repo.doctor()?, before);
        assert_eq!(repo.list_all_folders()?, vec![gone.clone()]);

        let real = repo.prune(false)?;
        assert_eq!(dry, real);
        Ok(())
    }

    #[test]
    fn test_doctor_reports_counts() -> Result<()> {
        let env = TestEnv::new()?;
        let a = env.folder("a")?;
        let b = env.folder("b")?;
        let repo = env.repo();

        repo.add_tag(&a, "work")?;
        repo.add_tag(&a, "rust")?;
        repo.add_tag(&b, "work")?;
        repo.clone_tag("rust", "spare")?;
        repo.remove_tag(&a, "spare")?;
        fs::remove_dir(&b)?;

        let report = repo.doctor()?;
        assert_eq!(report.total_tags, 3);
        assert_eq!(report.total_folders, 2);
        assert_eq!(report.total_associations, 3);
        assert_eq!(report.orphaned_tags, vec!["spare"]);
        assert_eq!(report.missing_folders, vec![b]);
        Ok(())
    }
}
