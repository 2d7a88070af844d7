use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::database::repo::TagRepository;
use crate::error::{Result, ScopeError};

pub const SESSION_ENV: &str = "SCOPE_SESSION";
pub const WORKSPACE_ENV: &str = "SCOPE_WORKSPACE";

/// One entry in a session workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedFolder {
    pub name: String,
    pub target: PathBuf,
}

/// What the shell sees of the session it was started for.
#[derive(Debug)]
pub struct SessionContext<'a> {
    pub session_id: &'a str,
    pub root: &'a Path,
    pub links: &'a [LinkedFolder],
}

impl SessionContext<'_> {
    pub fn env(&self) -> [(&'static str, String); 2] {
        [
            (SESSION_ENV, self.session_id.to_string()),
            (WORKSPACE_ENV, self.root.to_string_lossy().into_owned()),
        ]
    }
}

/// How the shell process ended. Any `Completed` is a normal end of session,
/// whatever the exit code.
#[derive(Debug)]
pub enum ShellOutcome {
    LaunchFailed(io::Error),
    Completed(Option<i32>),
}

pub trait Shell {
    fn run(&self, ctx: &SessionContext<'_>) -> ShellOutcome;
}

/// Spawns a real program attached to the caller's terminal.
#[derive(Debug, Clone)]
pub struct SystemShell {
    program: String,
    args: Vec<String>,
}

impl SystemShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Shell for SystemShell {
    fn run(&self, ctx: &SessionContext<'_>) -> ShellOutcome {
        debug!("Spawning {} in {:?}", self.program, ctx.root);
        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(ctx.root)
            .envs(ctx.env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status();

        match status {
            Ok(status) => ShellOutcome::Completed(status.code()),
            Err(e) => ShellOutcome::LaunchFailed(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub workspace: PathBuf,
    pub links: Vec<LinkedFolder>,
    pub exit_code: Option<i32>,
}

/// Temporary directory of symlinks. Removed when dropped, including during unwinding.
struct Workspace {
    dir: TempDir,
    links: Vec<LinkedFolder>,
}

impl Workspace {
    fn create(session_id: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("scope-{}-", sanitize(session_id)))
            .tempdir()?;
        debug!("Created workspace {:?}", dir.path());
        Ok(Self {
            dir,
            links: Vec::new(),
        })
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn link_all(&mut self, folders: &[PathBuf]) -> Result<()> {
        for (folder, name) in folders.iter().zip(assign_link_names(folders)) {
            let link = self.dir.path().join(&name);
            symlink_dir(folder, &link)?;
            self.links.push(LinkedFolder {
                name,
                target: folder.clone(),
            });
        }
        Ok(())
    }

    fn close(self) {
        let root = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed workspace {:?}", root),
            Err(e) => warn!("Failed to clean up workspace {:?}: {}", root, e),
        }
    }
}

pub struct SessionManager<'a, S> {
    repo: &'a TagRepository<'a>,
    shell: S,
}

impl<'a, S: Shell> SessionManager<'a, S> {
    pub fn new(repo: &'a TagRepository<'a>, shell: S) -> Self {
        Self { repo, shell }
    }

    /// Builds a workspace for the union of `tags`, runs the shell inside it and
    /// blocks until the shell exits. The workspace is gone by the time this returns.
    pub fn start<T: AsRef<str>>(&self, tags: &[T]) -> Result<SessionReport> {
        let session_id = session_id(tags);
        if session_id.is_empty() {
            return Err(ScopeError::InvalidName("tag name"));
        }

        let folders = self.repo.list_folders_for_tags(tags)?;
        if folders.is_empty() {
            return Err(ScopeError::NoFoldersFound(session_id));
        }

        install_interrupt_guard();

        let mut workspace = Workspace::create(&session_id)?;
        workspace.link_all(&folders)?;
        info!(
            "Session '{}' ready at {:?} with {} folders",
            session_id,
            workspace.root(),
            workspace.links.len()
        );

        let outcome = self.shell.run(&SessionContext {
            session_id: &session_id,
            root: workspace.root(),
            links: &workspace.links,
        });

        let root = workspace.root().to_path_buf();
        let links = workspace.links.clone();
        workspace.close();

        match outcome {
            ShellOutcome::LaunchFailed(e) => Err(ScopeError::ShellLaunch(e)),
            ShellOutcome::Completed(exit_code) => {
                if exit_code != Some(0) {
                    debug!("Shell for '{}' exited with {:?}", session_id, exit_code);
                }
                Ok(SessionReport {
                    session_id,
                    workspace: root,
                    links,
                    exit_code,
                })
            }
        }
    }
}

pub fn session_id<T: AsRef<str>>(tags: &[T]) -> String {
    let names: Vec<&str> = tags
        .iter()
        .map(|t| t.as_ref())
        .filter(|t| !t.trim().is_empty())
        .collect();
    names.join("+")
}

/// Link names in folder order: the base name, or `<base>-N` for the smallest
/// N not already used by an earlier link.
pub fn assign_link_names(folders: &[PathBuf]) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut names = Vec::with_capacity(folders.len());

    for folder in folders {
        let base = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());

        let mut name = base.clone();
        let mut counter = 1;
        while taken.contains(&name) {
            name = format!("{}-{}", base, counter);
            counter += 1;
        }

        taken.insert(name.clone());
        names.push(name);
    }
    names
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// The terminal delivers Ctrl-C to the shell and to us alike. Swallowing it here
/// keeps this process alive until the shell exits and the workspace is removed.
fn install_interrupt_guard() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let handler = || warn!("Interrupt received, waiting for session shell to exit");
        if let Err(e) = ctrlc::set_handler(handler) {
            debug!("Interrupt handler not installed: {}", e);
        }
    });
}
