//! helio-vcs: command line front end for per-project version control.
//!
//! Keeps a self-contained project file holding the tracked items and their
//! history, and syncs that history with the remote project store.
//!
//! # Usage
//!
//! ```bash
//! # Start a project and track an item
//! helio-vcs init --title "Sketch"
//! helio-vcs set lead --name "Lead piano" --payload '{"notes":[60,64,67]}'
//!
//! # Review and commit
//! helio-vcs status
//! helio-vcs commit -m "First idea"
//!
//! # Sync with the remote
//! helio-vcs login --token <TOKEN>
//! helio-vcs sync
//! ```

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use helio_vcs_core::{
    InMemoryProject, QuickStashAction, Revision, RevisionItem, SETTINGS_FILE, SyncSettings, SyncState,
    VCS_KEY, VersionControl, category,
};
use helio_vcs_sync::{RemoteProjectInfo, SessionContext, SyncListener, SyncService};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "helio-vcs")]
#[command(author = "Helio Contributors")]
#[command(version)]
#[command(about = "Per-project version control with remote sync")]
struct Cli {
    /// Project file
    #[arg(short, long, default_value = "helio-project.json")]
    project: PathBuf,

    /// Sync settings file
    #[arg(long, default_value = SETTINGS_FILE)]
    settings: PathBuf,

    /// Override the remote base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new project file
    Init {
        /// Project title
        #[arg(short, long, default_value = "Untitled")]
        title: String,
        /// Project id (default: a new UUID)
        #[arg(long)]
        id: Option<String>,
    },

    /// Add or replace a tracked item
    Set {
        /// Item id
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = category::PIANO_TRACK)]
        category: String,
        /// Item payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Stop tracking an item
    Remove { id: String },

    /// Show the staged changes
    Status,

    /// Commit staged changes
    Commit {
        #[arg(short, long)]
        message: String,
        /// Stage indices to commit (default: all)
        indices: Vec<usize>,
    },

    /// Discard staged changes
    Reset {
        /// Stage indices to reset (default: all)
        indices: Vec<usize>,
    },

    /// Show the revision tree
    Log,

    /// Check out a revision, discarding uncommitted changes
    Checkout {
        revision: String,
        /// Discard uncommitted changes without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Apply deltas of a revision without moving head
    #[command(name = "cherry-pick")]
    CherryPick {
        revision: String,
        /// Item ids to pick (default: all)
        items: Vec<String>,
    },

    /// Stash all changes, or restore the stash
    Stash,

    /// Store the API token in the settings file
    Login {
        #[arg(long)]
        token: String,
    },

    /// Graft new remote revisions without pulling or pushing
    Fetch,

    /// Pull and push new revisions
    Sync {
        /// Only pull these revisions
        #[arg(long)]
        pull: Vec<String>,
        /// Only push these revisions
        #[arg(long)]
        push: Vec<String>,
    },

    /// Replace the local history with a remote project
    Clone {
        /// Remote project id
        id: String,
    },

    /// Delete the project from the remote
    Delete,
}

/// Project file: metadata, tracked items and history
struct ProjectFile {
    id: String,
    title: String,
    items: InMemoryProject,
    vcs: VersionControl,
}

impl ProjectFile {
    fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file {:?}, run `helio-vcs init` first", path))?;
        let document: Value = serde_json::from_str(&data).context("Failed to parse project file")?;
        let items: InMemoryProject = serde_json::from_value(document["items"].clone())
            .context("Failed to parse tracked items")?;
        let vcs = VersionControl::deserialize(&document).context("Failed to load history")?;
        Ok(Self {
            id: document["id"].as_str().unwrap_or_default().to_string(),
            title: document["title"].as_str().unwrap_or_default().to_string(),
            items,
            vcs,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let history = self.vcs.serialize()?;
        let document = json!({
            "id": self.id,
            "title": self.title,
            "items": self.items,
            VCS_KEY: history[VCS_KEY],
        });
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(&document)?)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Prints session callbacks
#[derive(Default)]
struct ConsoleListener {
    failed: Option<String>,
}

impl SyncListener for ConsoleListener {
    fn on_project_info(&mut self, project: &RemoteProjectInfo) {
        println!(
            "Remote project: {} ({}), head {}",
            project.title,
            project.id,
            project.head.as_deref().unwrap_or("-")
        );
    }

    fn on_fetch_done(&mut self) {
        println!("Fetch done.");
    }

    fn on_sync_done(&mut self, nothing_to_sync: bool) {
        if nothing_to_sync {
            println!("Already up to date.");
        } else {
            println!("Sync done.");
        }
    }

    fn on_sync_failed(&mut self, errors: &[String]) {
        let first = errors.first().cloned().unwrap_or_else(|| "unknown error".to_string());
        eprintln!("Sync failed: {}", first);
        self.failed = Some(first);
    }

    fn on_revision_pulled(&mut self, revision: &Revision) {
        println!("  pulled  {} {}", short(revision.id()), revision.message());
    }

    fn on_revision_pushed(&mut self, revision: &Revision) {
        println!("  pushed  {} {}", short(revision.id()), revision.message());
    }

    fn on_clone_done(&mut self) {
        println!("Clone done.");
    }

    fn on_delete_done(&mut self) {
        println!("Project deleted from remote.");
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    match cli.command {
        Commands::Init { ref title, ref id } => cmd_init(&cli.project, title, id.clone()),
        Commands::Set {
            ref id,
            ref name,
            ref category,
            ref payload,
        } => cmd_set(&cli.project, id, name.as_deref(), category, payload),
        Commands::Remove { ref id } => cmd_remove(&cli.project, id),
        Commands::Status => cmd_status(&cli.project),
        Commands::Commit {
            ref message,
            ref indices,
        } => cmd_commit(&cli.project, message, indices),
        Commands::Reset { ref indices } => cmd_reset(&cli.project, indices),
        Commands::Log => cmd_log(&cli.project),
        Commands::Checkout { ref revision, force } => cmd_checkout(&cli.project, revision, force),
        Commands::CherryPick {
            ref revision,
            ref items,
        } => cmd_cherry_pick(&cli.project, revision, items),
        Commands::Stash => cmd_stash(&cli.project),
        Commands::Login { ref token } => cmd_login(&cli.settings, token),
        Commands::Fetch | Commands::Sync { .. } | Commands::Clone { .. } | Commands::Delete => {
            cmd_remote(&cli)
        }
    }
}

fn cmd_init(path: &Path, title: &str, id: Option<String>) -> Result<()> {
    if path.exists() {
        bail!("Project file {:?} already exists", path);
    }
    let project = ProjectFile {
        id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        title: title.to_string(),
        items: InMemoryProject::new(),
        vcs: VersionControl::new(),
    };
    project.save(path)?;
    println!("Initialized project {} ({})", project.title, project.id);
    Ok(())
}

fn cmd_set(path: &Path, id: &str, name: Option<&str>, category: &str, payload: &str) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
    project
        .items
        .upsert(RevisionItem::new(id, category, name.unwrap_or(id), payload));
    project.save(path)
}

fn cmd_remove(path: &Path, id: &str) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    if project.items.remove(id).is_none() {
        bail!("No tracked item {}", id);
    }
    project.save(path)
}

fn cmd_status(path: &Path) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    project.vcs.rebuild_diff(&project.items);

    println!("On revision {} ({})", short(project.vcs.head_id()), project.vcs.head().message());
    if project.vcs.has_quick_stash() {
        println!("Quick stash holds changes.");
    }
    if !project.vcs.diff_has_changes() {
        println!("Nothing to commit.");
        return Ok(());
    }
    for (index, item) in project.vcs.diff().iter().enumerate() {
        println!("  [{}] {}", index, item.describe());
    }
    Ok(())
}

fn all_or(indices: &[usize], len: usize) -> Vec<usize> {
    if indices.is_empty() {
        (0..len).collect()
    } else {
        indices.to_vec()
    }
}

fn cmd_commit(path: &Path, message: &str, indices: &[usize]) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    project.vcs.rebuild_diff(&project.items);
    let selected = all_or(indices, project.vcs.diff().len());
    let id = project.vcs.commit(&project.items, &selected, message)?;
    project.save(path)?;
    println!("Committed {} ({} change(s))", short(&id), selected.len());
    Ok(())
}

fn cmd_reset(path: &Path, indices: &[usize]) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    project.vcs.rebuild_diff(&project.items);
    if indices.is_empty() {
        project.vcs.reset_all_changes(&mut project.items);
    } else {
        project.vcs.reset_changes(&mut project.items, indices)?;
    }
    project.save(path)
}

fn cmd_log(path: &Path) -> Result<()> {
    let project = ProjectFile::load(path)?;
    print_tree(project.vcs.root(), project.vcs.head_id(), 0);
    Ok(())
}

fn print_tree(revision: &Revision, head_id: &str, depth: usize) {
    let marker = if revision.id() == head_id { "*" } else { " " };
    let state = match revision.sync_state() {
        SyncState::NoSync => "local",
        SyncState::ShallowCopy => "shallow",
        SyncState::FullSync => "synced",
    };
    let time = chrono::DateTime::from_timestamp_millis(revision.timestamp())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!(
        "{}{} {} [{}] {} {}",
        "  ".repeat(depth),
        marker,
        short(revision.id()),
        state,
        time,
        revision.message()
    );
    for child in revision.children() {
        print_tree(child, head_id, depth + 1);
    }
}

fn resolve_revision(vcs: &VersionControl, prefix: &str) -> Result<String> {
    let matches: Vec<&str> = vcs
        .revisions()
        .map(|r| r.id())
        .filter(|id| id.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(id.to_string()),
        [] => Err(anyhow!("No revision matches {}", prefix)),
        _ => Err(anyhow!("Revision prefix {} is ambiguous", prefix)),
    }
}

fn cmd_checkout(path: &Path, revision: &str, force: bool) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    let id = resolve_revision(&project.vcs, revision)?;
    project.vcs.rebuild_diff(&project.items);
    if project.vcs.diff_has_changes() && !force {
        bail!("Uncommitted changes would be lost, use --force to discard them");
    }
    project.vcs.checkout(&mut project.items, &id)?;
    project.save(path)?;
    println!("Checked out {}", short(&id));
    Ok(())
}

fn cmd_cherry_pick(path: &Path, revision: &str, items: &[String]) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    let id = resolve_revision(&project.vcs, revision)?;
    let count = project.vcs.cherry_pick(&mut project.items, &id, items)?;
    project.save(path)?;
    println!("Applied {} delta(s) from {}", count, short(&id));
    Ok(())
}

fn cmd_stash(path: &Path) -> Result<()> {
    let mut project = ProjectFile::load(path)?;
    match project.vcs.toggle_quick_stash(&mut project.items)? {
        QuickStashAction::Stashed => println!("Changes stashed."),
        QuickStashAction::Restored => println!("Stash restored."),
        QuickStashAction::NothingToDo => println!("Nothing to stash."),
    }
    project.save(path)
}

fn cmd_login(settings_path: &Path, token: &str) -> Result<()> {
    let mut settings = SyncSettings::load(settings_path)?;
    settings.api_token = Some(token.to_string());
    settings.save(settings_path)?;
    println!("Token saved to {:?}", settings_path);
    Ok(())
}

fn cmd_remote(cli: &Cli) -> Result<()> {
    let mut settings = SyncSettings::load(&cli.settings)?;
    if let Some(url) = &cli.base_url {
        settings.base_url = url.clone();
    }
    let context = SessionContext::from_settings(&settings);
    let mut service = SyncService::new(&context)?;

    let mut project = match &cli.command {
        Commands::Clone { id } if !cli.project.exists() => ProjectFile {
            id: id.clone(),
            title: String::new(),
            items: InMemoryProject::new(),
            vcs: VersionControl::new(),
        },
        _ => ProjectFile::load(&cli.project)?,
    };

    let started = match &cli.command {
        Commands::Fetch => service.do_fetch(&project.vcs, &project.id, &project.title),
        Commands::Sync { pull, push } => {
            service.do_sync(&project.vcs, &project.id, &project.title, pull.clone(), push.clone())
        }
        Commands::Clone { id } => {
            project.id = id.clone();
            service.do_clone(id)
        }
        Commands::Delete => service.do_delete(&project.id),
        _ => unreachable!("not a remote command"),
    };
    if !started {
        bail!("Failed to start the sync session");
    }

    let mut listener = ConsoleListener::default();
    service.wait(&mut project.vcs, &mut project.items, &mut listener);

    if let Commands::Clone { .. } = cli.command {
        if let Some(info) = service.remote_project() {
            project.title = info.title.clone();
        }
    }
    project.save(&cli.project)?;

    match listener.failed {
        Some(error) => Err(anyhow!(error)),
        None => Ok(()),
    }
}
