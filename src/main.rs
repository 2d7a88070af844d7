mod archive;
mod commands;
mod database;
mod error;
mod ingest;
mod runner;
mod session;
mod utils;

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, Level};

use crate::commands::App;
use crate::database::store::Store;
use crate::utils::config::Settings;

const LOG_ENV: &str = "SCOPE_LOG";

#[derive(Parser, Debug)]
#[command(name = "scope", author, version, long_about = None)]
#[command(about = "Tag folders and work on them together")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Database file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tag a folder (use . for the current directory)
    Tag {
        path: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Remove a tag from a folder
    Untag { path: String, tag: String },
    /// Show the tags of a folder
    Tags { path: String },
    /// List all tags, or the folders of one tag
    List {
        tag: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Open a shell in a workspace linking every folder of the given tags
    Start {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Find .scope files below a directory and apply their tags
    Scan {
        #[arg(default_value = ".")]
        path: String,
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Print the path of a tagged folder, for `cd "$(scope go <tag>)"`
    Go { tag: String },
    /// Open the folders of a tag in the file manager
    Open { tag: String },
    /// Open the folders of a tag in the editor
    Edit { tag: String },
    /// Run a command in every folder of a tag
    Each {
        tag: String,
        #[arg(short, long)]
        parallel: bool,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show `git status` for the repositories of a tag
    Status { tag: String },
    /// Run `git pull` in the repositories of a tag, in parallel
    Pull { tag: String },
    /// Rename a tag
    Rename { old: String, new: String },
    /// Move every folder of one tag to another and delete the first
    Merge { src: String, dst: String },
    /// Copy a tag's folders to a new tag
    Clone { src: String, new: String },
    /// Delete a tag from every folder
    #[command(name = "remove-tag")]
    RemoveTag { tag: String },
    /// Remove folders that no longer exist on disk
    Prune {
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Check the database for orphaned tags and missing folders
    Doctor {
        #[arg(long)]
        json: bool,
    },
    /// Write all tags as YAML to stdout or a file
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add the tags of a YAML export
    Import { file: PathBuf },
    /// Print version, paths and database stats
    Debug,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let from_env = env::var(LOG_ENV).ok().and_then(|v| v.parse::<Level>().ok());
    let level = from_env.unwrap_or(match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    });

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    debug!("Using database {:?}", settings.db_path);

    let store = Store::new(&settings.db_path);
    store.init().context("failed to initialize database")?;

    let result = dispatch(&App::new(&settings, &store)?, cli.command);
    store.close().context("failed to close database")?;
    result
}

fn dispatch(app: &App<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Tag { path, tags } => app.tag(&path, &tags),
        Commands::Untag { path, tag } => app.untag(&path, &tag),
        Commands::Tags { path } => app.tags(&path),
        Commands::List { tag, json } => app.list(tag.as_deref(), json),
        Commands::Start { tags } => app.start(&tags),
        Commands::Scan { path, dry_run } => app.scan(&path, dry_run),
        Commands::Go { tag } => app.go(&tag),
        Commands::Open { tag } => app.open(&tag),
        Commands::Edit { tag } => app.edit(&tag),
        Commands::Each { tag, parallel, command } => app.each(&tag, parallel, &command),
        Commands::Status { tag } => app.status(&tag),
        Commands::Pull { tag } => app.pull(&tag),
        Commands::Rename { old, new } => app.rename(&old, &new),
        Commands::Merge { src, dst } => app.merge(&src, &dst),
        Commands::Clone { src, new } => app.clone_tag(&src, &new),
        Commands::RemoveTag { tag } => app.remove_tag(&tag),
        Commands::Prune { dry_run } => app.prune(dry_run),
        Commands::Doctor { json } => app.doctor(json),
        Commands::Export { output } => app.export(output.as_deref()),
        Commands::Import { file } => app.import(&file),
        Commands::Debug => app.debug(),
    }
}
