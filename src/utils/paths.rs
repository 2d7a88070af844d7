use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};

/// Turns a user-typed path into the absolute form the repository stores:
/// `.` is `cwd`, a leading `~` is the home directory, relative paths are
/// joined onto `cwd`, and `.`/`..` components are folded lexically.
pub fn resolve_path(input: &str, cwd: &Path, home: Option<&Path>) -> Result<PathBuf> {
    let expanded = if input == "~" || input.starts_with("~/") {
        let home = home.ok_or_else(|| anyhow!("failed to get home directory"))?;
        home.join(input.trim_start_matches('~').trim_start_matches('/'))
    } else {
        PathBuf::from(input)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize(&absolute))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_forms() -> Result<()> {
        let cwd = Path::new("/work/projects");
        let home = Some(Path::new("/home/ana"));

        assert_eq!(resolve_path(".", cwd, home)?, PathBuf::from("/work/projects"));
        assert_eq!(resolve_path("api", cwd, home)?, PathBuf::from("/work/projects/api"));
        assert_eq!(resolve_path("../lib/./x/", cwd, home)?, PathBuf::from("/work/lib/x"));
        assert_eq!(resolve_path("~", cwd, home)?, PathBuf::from("/home/ana"));
        assert_eq!(resolve_path("~/code/app", cwd, home)?, PathBuf::from("/home/ana/code/app"));
        assert_eq!(resolve_path("/abs/../dir", cwd, home)?, PathBuf::from("/dir"));
        Ok(())
    }

    #[test]
    fn test_tilde_user_is_not_home() -> Result<()> {
        let cwd = Path::new("/work");
        let home = Some(Path::new("/home/ana"));
        assert_eq!(resolve_path("~bob", cwd, home)?, PathBuf::from("/work/~bob"));
        assert!(resolve_path("~/x", cwd, None).is_err());
        Ok(())
    }
}
