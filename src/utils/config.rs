use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config";
pub const DB_FILE_NAME: &str = "scope.db";

const DEFAULT_SESSION_SHELL: &str = "/bin/bash";
const DEFAULT_EACH_SHELL: &str = "/bin/sh";
const FALLBACK_EDITORS: [&str; 3] = ["code", "vim", "nano"];

/// Resolved runtime settings. Built once at startup and passed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub db_path: PathBuf,
    /// Interactive shell for `start` sessions.
    pub shell: String,
    /// Shell used with `-c` by `each`, `status` and `pull`. `$SCOPE_EACH_SHELL`,
    /// then the file's `EACH_SHELL`, then `$SHELL`.
    pub each_shell: String,
    pub editor: Option<String>,
}

impl Settings {
    /// Reads the process environment and the optional config file.
    pub fn load() -> Result<Self> {
        Self::resolve(|key| env::var(key).ok().filter(|v| !v.is_empty()), dirs::home_dir())
    }

    /// Precedence for each value: environment, then config file, then built-in default.
    pub fn resolve<F>(lookup: F, home: Option<PathBuf>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = match lookup("SCOPE_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => home
                .ok_or_else(|| anyhow!("failed to get home directory"))?
                .join(".config")
                .join("scope"),
        };

        let file = load_config_file(&config_dir.join(CONFIG_FILE_NAME))?;
        let from_file = |key: &str| file.get(key).cloned();

        let db_path = lookup("SCOPE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join(DB_FILE_NAME));

        let shell = lookup("SHELL")
            .or_else(|| from_file("SHELL"))
            .unwrap_or_else(|| DEFAULT_SESSION_SHELL.to_string());

        let each_shell = lookup("SCOPE_EACH_SHELL")
            .or_else(|| from_file("EACH_SHELL"))
            .or_else(|| lookup("SHELL"))
            .unwrap_or_else(|| DEFAULT_EACH_SHELL.to_string());

        let editor = lookup("VISUAL")
            .or_else(|| lookup("EDITOR"))
            .or_else(|| from_file("EDITOR"))
            .or_else(|| {
                let path = lookup("PATH")?;
                FALLBACK_EDITORS
                    .iter()
                    .find(|e| find_on_path(e, &path).is_some())
                    .map(|e| e.to_string())
            });

        Ok(Self {
            config_dir,
            db_path,
            shell,
            each_shell,
            editor,
        })
    }
}

/// Parses `KEY=VALUE` lines. A missing file is an empty config.
fn load_config_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    if !path.exists() {
        return Ok(values);
    }

    let file = File::open(path).with_context(|| format!("Failed to open config file {:?}", path))?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => match key.trim() {
                key @ ("SHELL" | "EACH_SHELL" | "EDITOR") => {
                    values.insert(key.to_string(), value.trim().to_string());
                }
                other => debug!("Ignoring unknown config key '{}'", other),
            },
            None => debug!("Ignoring malformed config line '{}'", line),
        }
    }

    Ok(values)
}

fn find_on_path(program: &str, path_var: &str) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
