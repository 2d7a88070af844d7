use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crossbeam::channel::unbounded;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Exited(Option<i32>),
    LaunchFailed(String),
}

impl RunStatus {
    pub fn success(&self) -> bool {
        matches!(self, RunStatus::Exited(Some(0)))
    }
}

/// Result of running the command in one folder. `output` is empty when the
/// output was streamed to the terminal instead of captured.
#[derive(Debug, Clone)]
pub struct EachOutcome {
    pub folder: PathBuf,
    pub output: String,
    pub status: RunStatus,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EachSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl EachSummary {
    fn record(&mut self, status: &RunStatus) {
        if status.success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Runs a shell command line in a set of folders via `<shell> -c`.
#[derive(Debug, Clone)]
pub struct Runner {
    shell: String,
}

impl Runner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    /// One folder after another, output going straight to the terminal.
    pub fn run_sequential<F, G>(
        &self,
        folders: &[PathBuf],
        command: &str,
        mut before: F,
        mut after: G,
    ) -> EachSummary
    where
        F: FnMut(&Path),
        G: FnMut(&EachOutcome),
    {
        let mut summary = EachSummary::default();
        for folder in folders {
            before(folder);
            let status = match Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .current_dir(folder)
                .stdin(Stdio::null())
                .status()
            {
                Ok(status) => RunStatus::Exited(status.code()),
                Err(e) => RunStatus::LaunchFailed(e.to_string()),
            };
            summary.record(&status);
            after(&EachOutcome {
                folder: folder.clone(),
                output: String::new(),
                status,
            });
        }
        summary
    }

    /// One worker thread per folder. Outcomes reach `on_result` in completion
    /// order through a single collector; no worker can affect another.
    pub fn run_parallel<F>(
        &self,
        folders: &[PathBuf],
        command: &str,
        mut on_result: F,
    ) -> EachSummary
    where
        F: FnMut(&EachOutcome),
    {
        let (tx, rx) = unbounded::<EachOutcome>();

        let mut handles = Vec::with_capacity(folders.len());
        for folder in folders {
            let tx = tx.clone();
            let runner = self.clone();
            let folder = folder.clone();
            let command = command.to_string();
            handles.push(thread::spawn(move || {
                let outcome = runner.capture(&folder, &command);
                let _ = tx.send(outcome);
            }));
        }
        // Drop our own tx so the collector ends once every worker is done
        drop(tx);

        let mut summary = EachSummary::default();
        for outcome in rx {
            summary.record(&outcome.status);
            on_result(&outcome);
        }

        for h in handles {
            if h.join().is_err() {
                error!("Worker thread panicked");
                summary.failed += 1;
            }
        }

        info!(
            "Ran '{}' in {} folders: {} succeeded, {} failed",
            command,
            folders.len(),
            summary.succeeded,
            summary.failed
        );
        summary
    }

    /// Runs the command with stdout and stderr captured, stderr appended after stdout.
    pub fn capture(&self, folder: &Path, command: &str) -> EachOutcome {
        debug!("Running '{}' in {:?}", command, folder);
        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(folder)
            .stdin(Stdio::null())
            .output();

        match result {
            Ok(out) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                EachOutcome {
                    folder: folder.to_path_buf(),
                    output,
                    status: RunStatus::Exited(out.status.code()),
                }
            }
            Err(e) => EachOutcome {
                folder: folder.to_path_buf(),
                output: String::new(),
                status: RunStatus::LaunchFailed(e.to_string()),
            },
        }
    }
}

/// Folders that are git work trees (have a `.git` entry).
pub fn git_folders(folders: &[PathBuf]) -> Vec<PathBuf> {
    folders
        .iter()
        .filter(|f| f.join(".git").exists())
        .cloned()
        .collect()
}
