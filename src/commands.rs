use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use crate::archive::snapshot;
use crate::database::repo::TagRepository;
use crate::database::store::Store;
use crate::error::ScopeError;
use crate::ingest::scanner;
use crate::runner::each::{git_folders, EachOutcome, EachSummary, Runner};
use crate::session::workspace::{
    SessionContext, SessionManager, Shell, ShellOutcome, SystemShell, SESSION_ENV, WORKSPACE_ENV,
};
use crate::utils::config::Settings;
use crate::utils::paths::resolve_path;

/// Command handlers behind the CLI. Paths typed by the user are resolved here,
/// so everything below receives absolute paths.
pub struct App<'a> {
    settings: &'a Settings,
    store: &'a Store,
    repo: TagRepository<'a>,
    cwd: PathBuf,
    home: Option<PathBuf>,
}

impl<'a> App<'a> {
    pub fn new(settings: &'a Settings, store: &'a Store) -> Result<Self> {
        let cwd = env::current_dir().context("failed to get current directory")?;
        Ok(Self {
            settings,
            store,
            repo: TagRepository::new(store),
            cwd,
            home: dirs::home_dir(),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_path(path, &self.cwd, self.home.as_deref())
    }

    fn folders_for(&self, tag: &str) -> Result<Vec<PathBuf>> {
        let folders = self.repo.list_folders_by_tag(tag)?;
        if folders.is_empty() {
            return Err(ScopeError::NoFoldersFound(tag.to_string()).into());
        }
        Ok(folders)
    }

    pub fn tag(&self, path: &str, tags: &[String]) -> Result<()> {
        let path = self.resolve(path)?;
        for tag in tags {
            self.repo.add_tag(&path, tag)?;
            println!("Tagged '{}' with '{}'", path.display(), tag);
        }
        Ok(())
    }

    pub fn untag(&self, path: &str, tag: &str) -> Result<()> {
        let path = self.resolve(path)?;
        self.repo.remove_tag(&path, tag)?;
        println!("Removed tag '{}' from '{}'", tag, path.display());
        Ok(())
    }

    pub fn tags(&self, path: &str) -> Result<()> {
        let path = self.resolve(path)?;
        let tags = self.repo.get_tags_for_folder(&path)?;
        if tags.is_empty() {
            println!("No tags found for '{}'", path.display());
            return Ok(());
        }

        println!("Tags for '{}':", path.display());
        for tag in tags {
            println!("  {}", tag);
        }
        Ok(())
    }

    pub fn list(&self, tag: Option<&str>, json: bool) -> Result<()> {
        if let Some(tag) = tag {
            let folders = self.repo.list_folders_by_tag(tag)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
                return Ok(());
            }
            if folders.is_empty() {
                println!("No folders found with tag '{}'", tag);
                return Ok(());
            }
            println!("Folders tagged with '{}':", tag);
            for folder in &folders {
                println!("  {}", folder.display());
            }
            println!("\nTotal: {} folders", folders.len());
            return Ok(());
        }

        let tags = self.repo.list_tags()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&tags)?);
            return Ok(());
        }
        if tags.is_empty() {
            println!("No tags found. Use 'scope tag <path> <tag>' to create one.");
            return Ok(());
        }

        println!("Tags:");
        for (name, count) in &tags {
            let plural = if *count == 1 { "" } else { "s" };
            println!("  {:<20} {} folder{}", name, count, plural);
        }
        println!("\nTotal: {} tags", tags.len());
        Ok(())
    }

    pub fn start(&self, tags: &[String]) -> Result<()> {
        let shell = BannerShell {
            inner: SystemShell::new(self.settings.shell.clone()),
        };
        let report = SessionManager::new(&self.repo, shell).start(tags)?;

        info!(
            "Session '{}' ({} folders at {:?}) ended with shell exit code {:?}",
            report.session_id,
            report.links.len(),
            report.workspace,
            report.exit_code
        );
        println!("\nScope session ended. Workspace cleaned up.");
        Ok(())
    }

    pub fn scan(&self, path: &str, dry_run: bool) -> Result<()> {
        let root = self.resolve(path)?;
        println!("Scanning {} for .scope files...\n", root.display());

        let report = scanner::scan_directory(&root).context("scan failed")?;
        if report.scopes.is_empty() {
            println!("No .scope files found.");
        } else {
            println!("Found {} .scope files:\n", report.scopes.len());
            for scope in &report.scopes {
                println!("  {}", scope.folder.display());
                println!("    Tags: {}", scope.tags.join(", "));
            }
        }

        if !report.issues.is_empty() {
            println!("\nWarnings ({} files had parsing errors):", report.issues.len());
            for issue in &report.issues {
                println!("  {}: {}", issue.file.display(), issue.error);
            }
        }

        if dry_run || report.scopes.is_empty() {
            return Ok(());
        }

        let summary = scanner::apply_scopes(&self.repo, &report.scopes);
        println!(
            "\nApplied {} tag assignments ({} failed).",
            summary.applied, summary.failed
        );
        Ok(())
    }

    pub fn go(&self, tag: &str) -> Result<()> {
        let folders = self.folders_for(tag)?;
        if let [only] = folders.as_slice() {
            println!("{}", only.display());
            return Ok(());
        }

        let mut stderr = io::stderr();
        writeln!(stderr, "Multiple folders found for '{}':", tag)?;
        for (i, folder) in folders.iter().enumerate() {
            writeln!(stderr, "  [{}] {}", i + 1, folder.display())?;
        }
        write!(stderr, "\nSelect folder (1-{}): ", folders.len())?;
        stderr.flush()?;

        let mut input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut input)
            .context("failed to read input")?;
        let choice = pick(&input, folders.len())?;
        println!("{}", folders[choice].display());
        Ok(())
    }

    pub fn open(&self, tag: &str) -> Result<()> {
        let folders = self.folders_for(tag)?;
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else if cfg!(unix) {
            "xdg-open"
        } else {
            bail!("unsupported operating system: {}", env::consts::OS);
        };

        for folder in &folders {
            match Command::new(opener).arg(folder).spawn() {
                Ok(_) => println!("Opened: {}", folder.display()),
                Err(e) => warn!("Failed to open {:?}: {}", folder, e),
            }
        }
        Ok(())
    }

    pub fn edit(&self, tag: &str) -> Result<()> {
        let folders = self.folders_for(tag)?;
        let editor = self
            .settings
            .editor
            .as_deref()
            .ok_or_else(|| {
                anyhow!("no editor found. Set $EDITOR or $VISUAL environment variable")
            })?;

        for folder in &folders {
            match Command::new(editor).arg(folder).spawn() {
                Ok(_) => println!("Opened in {}: {}", editor, folder.display()),
                Err(e) => warn!("Failed to open {:?} in {}: {}", folder, editor, e),
            }
        }
        Ok(())
    }

    pub fn each(&self, tag: &str, parallel: bool, command: &[String]) -> Result<()> {
        let folders = self.folders_for(tag)?;
        let command = command.join(" ");
        let runner = Runner::new(self.settings.each_shell.clone());

        let summary = if parallel {
            runner.run_parallel(&folders, &command, |outcome| {
                print_header(&outcome.folder);
                print!("{}", outcome.output);
                print_failure(outcome);
            })
        } else {
            runner.run_sequential(&folders, &command, print_header, print_failure)
        };

        print_summary(summary);
        Ok(())
    }

    pub fn status(&self, tag: &str) -> Result<()> {
        let folders = git_folders(&self.folders_for(tag)?);
        let runner = Runner::new(self.settings.each_shell.clone());

        for folder in &folders {
            let outcome = runner.capture(folder, "git status -s");
            if !outcome.output.is_empty() {
                println!("\x1b[1;33m[{}]\x1b[0m {}", display_name(folder), folder.display());
                print!("{}", outcome.output);
                println!();
            }
        }
        Ok(())
    }

    pub fn pull(&self, tag: &str) -> Result<()> {
        let folders = git_folders(&self.folders_for(tag)?);
        if folders.is_empty() {
            println!("No git repositories found with this tag");
            return Ok(());
        }

        println!("Pulling {} repositories...", folders.len());
        let runner = Runner::new(self.settings.each_shell.clone());
        let summary = runner.run_parallel(&folders, "git pull", |outcome| {
            print_header(&outcome.folder);
            print!("{}", outcome.output);
            print_failure(outcome);
        });
        print_summary(summary);
        Ok(())
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.repo.rename_tag(old, new)?;
        println!("Renamed tag '{}' to '{}'", old, new);
        Ok(())
    }

    pub fn merge(&self, src: &str, dst: &str) -> Result<()> {
        let moved = self.repo.merge_tag(src, dst)?;
        println!("Merged '{}' into '{}' ({} folders moved)", src, dst, moved);
        Ok(())
    }

    pub fn clone_tag(&self, src: &str, new: &str) -> Result<()> {
        let copied = self.repo.clone_tag(src, new)?;
        println!("Cloned '{}' to '{}' ({} folders)", src, new, copied);
        Ok(())
    }

    pub fn remove_tag(&self, tag: &str) -> Result<()> {
        self.repo.delete_tag(tag)?;
        println!("Removed tag '{}'", tag);
        Ok(())
    }

    pub fn prune(&self, dry_run: bool) -> Result<()> {
        let report = self.repo.prune(dry_run)?;
        if report.removed_count == 0 {
            println!("No stale folders found. Everything is clean!");
            return Ok(());
        }

        let verb = if dry_run { "Would remove" } else { "Removed" };
        println!("{} {} stale folder(s):", verb, report.removed_count);
        for path in &report.removed_folders {
            println!("  {}", path.display());
        }
        Ok(())
    }

    pub fn doctor(&self, json: bool) -> Result<()> {
        let report = self.repo.doctor()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Tags:         {}", report.total_tags);
        println!("Folders:      {}", report.total_folders);
        println!("Associations: {}", report.total_associations);

        if report.orphaned_tags.is_empty() && report.missing_folders.is_empty() {
            println!("\nNo problems found.");
            return Ok(());
        }
        if !report.orphaned_tags.is_empty() {
            println!("\nTags with no folders ({}):", report.orphaned_tags.len());
            for tag in &report.orphaned_tags {
                println!("  {}", tag);
            }
        }
        if !report.missing_folders.is_empty() {
            println!(
                "\nFolders missing on disk ({}), run 'scope prune' to remove:",
                report.missing_folders.len()
            );
            for path in &report.missing_folders {
                println!("  {}", path.display());
            }
        }
        Ok(())
    }

    pub fn export(&self, output: Option<&Path>) -> Result<()> {
        let snap = snapshot::export(&self.repo)?;
        if snap.tags.is_empty() {
            eprintln!("No tags to export");
            return Ok(());
        }

        let yaml = snapshot::to_yaml(&snap)?;
        match output {
            Some(path) => {
                fs::write(path, yaml).with_context(|| format!("failed to write {:?}", path))?;
                eprintln!("Exported {} tags to {}", snap.tags.len(), path.display());
            }
            None => print!("{}", yaml),
        }
        Ok(())
    }

    pub fn import(&self, file: &Path) -> Result<()> {
        let content = fs::read_to_string(file)
            .with_context(|| format!("failed to read file {:?}", file))?;
        let snap = snapshot::from_yaml(&content).context("failed to parse YAML")?;
        if snap.tags.is_empty() {
            println!("No tags found in import file");
            return Ok(());
        }

        let summary = snapshot::import(&self.repo, &snap);
        for path in &summary.skipped {
            eprintln!("Skipping non-existent folder: {}", path.display());
        }
        println!(
            "Imported {} tag assignments ({} skipped, {} failed)",
            summary.imported,
            summary.skipped.len(),
            summary.failed
        );
        Ok(())
    }

    pub fn debug(&self) -> Result<()> {
        let db_path = self.store.path();
        println!("Scope Debug Information");
        println!("=======================");
        println!("Version:     {}", env!("CARGO_PKG_VERSION"));
        println!("OS/Arch:     {}/{}", env::consts::OS, env::consts::ARCH);
        println!("Config dir:  {}", self.settings.config_dir.display());
        println!("Database:    {}", db_path.display());
        println!("DB open:     {}", self.store.is_initialized());
        match fs::metadata(db_path) {
            Ok(meta) => println!("DB size:     {} bytes", meta.len()),
            Err(_) => println!("DB size:     (not found)"),
        }
        println!("Shell:       {}", self.settings.shell);

        if let Ok(session) = env::var(SESSION_ENV) {
            println!("In session:  {}", session);
            println!("Workspace:   {}", env::var(WORKSPACE_ENV).unwrap_or_default());
        }

        let tags = self.repo.list_tags()?;
        let assignments: usize = tags.values().sum();
        println!("\nStats:");
        println!("  Tags:        {}", tags.len());
        println!("  Folders:     {}", self.repo.list_all_folders()?.len());
        println!("  Assignments: {}", assignments);
        Ok(())
    }
}

/// Prints the session banner, then hands the terminal to the real shell.
struct BannerShell {
    inner: SystemShell,
}

impl Shell for BannerShell {
    fn run(&self, ctx: &SessionContext<'_>) -> ShellOutcome {
        println!("Scope session started with tag '{}'", ctx.session_id);
        println!("Workspace: {}", ctx.root.display());
        println!("Folders: {}\n", ctx.links.len());
        println!("Type 'exit' to leave the scoped session");
        println!("---");
        self.inner.run(ctx)
    }
}

/// Parses a 1-based menu choice into an index.
fn pick(input: &str, len: usize) -> Result<usize> {
    let input = input.trim();
    match input.parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Ok(n - 1),
        _ => bail!("invalid selection: {}", input),
    }
}

fn display_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.display().to_string())
}

fn print_header(folder: &Path) {
    println!("\n\x1b[1;34m[{}]\x1b[0m {}", display_name(folder), folder.display());
    println!("{}", "-".repeat(40));
}

fn print_failure(outcome: &EachOutcome) {
    if !outcome.status.success() {
        eprintln!("\x1b[1;31mError:\x1b[0m {:?}", outcome.status);
    }
}

fn print_summary(summary: EachSummary) {
    println!(
        "\n\x1b[1mSummary:\x1b[0m {} succeeded, {} failed",
        summary.succeeded, summary.failed
    );
}
