//! papersync command-line tool.
//!
//! Provides subcommands for syncing a document repository, inspecting its
//! documents and recent changes, checking a range against recent activity,
//! applying an edit, and generating / validating configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use papersync_core::config::PaperSyncConfig;
use papersync_core::conflict::ConflictDetector;
use papersync_core::edit::EditApplier;
use papersync_core::{
    DocumentId, DocumentRange, EditResult, GitRevisionStore, LineRange, RevisionId,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// papersync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "papersync",
    version,
    about = "Apply automated edits to a git-hosted paper without trampling its authors"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "~/.config/papersync/config.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the working copy up to date with the remote.
    Sync,

    /// Show the current revision and working copy state.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// List documents in the current revision.
    Docs,

    /// Show line ranges of a document changed by recent commits.
    Diff {
        /// Document path relative to the repository root.
        #[arg(long)]
        doc: String,

        /// How many commits back to compare against.
        #[arg(long, default_value = "1")]
        commits: usize,
    },

    /// Check whether a range may be edited now.
    Check {
        #[command(flatten)]
        target: Target,
    },

    /// Apply an edit to a range.
    Apply {
        #[command(flatten)]
        target: Target,

        /// Revision the range refers to. Defaults to the current one.
        #[arg(long)]
        revision: Option<String>,

        /// Replacement text.
        #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
        content: Option<String>,

        /// File holding the replacement text.
        #[arg(long)]
        content_file: Option<PathBuf>,

        /// Submit as a comment instead of a replacement.
        #[arg(long)]
        comment: bool,

        /// Print the resulting patch without applying it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./papersync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

/// A line range in one document.
#[derive(Args, Debug)]
struct Target {
    /// Document path relative to the repository root.
    #[arg(long)]
    doc: String,

    /// First line of the range (0-based, inclusive).
    #[arg(long)]
    start: usize,

    /// End of the range (0-based, exclusive).
    #[arg(long)]
    end: usize,
}

impl Target {
    fn selection(&self) -> Result<LineRange> {
        LineRange::new(self.start, self.end).ok_or_else(|| {
            anyhow::anyhow!("invalid range: start {} is after end {}", self.start, self.end)
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    match cli.command {
        Commands::Init { output } => {
            init_logging("warn");
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging("warn");
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path)?;
            init_logging(&config.general.log_level);

            match command {
                Commands::Sync => cmd_sync(&config),
                Commands::Status { json } => cmd_status(&config, json),
                Commands::Docs => cmd_docs(&config),
                Commands::Diff { doc, commits } => cmd_diff(&config, &doc, commits),
                Commands::Check { target } => cmd_check(&config, &target),
                Commands::Apply {
                    target,
                    revision,
                    content,
                    content_file,
                    comment,
                    dry_run,
                } => {
                    let content = match (content, content_file) {
                        (Some(text), _) => text,
                        (None, Some(path)) => std::fs::read_to_string(&path)
                            .with_context(|| format!("failed to read {}", path.display()))?,
                        (None, None) => {
                            anyhow::bail!("one of --content or --content-file is required")
                        }
                    };
                    cmd_apply(&config, &target, revision, content, comment, dry_run)
                }
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<PaperSyncConfig> {
    PaperSyncConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn open_store(config: &PaperSyncConfig) -> Result<GitRevisionStore> {
    GitRevisionStore::open(config)
        .with_context(|| format!("failed to open working copy of {}", config.remote.url))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_sync(config: &PaperSyncConfig) -> Result<()> {
    // Opening syncs once already.
    let store = open_store(config)?;
    let revision = store.current_revision_id()?;
    println!(
        "{}",
        style::success(&format!(
            "{} is at {}",
            config.remote.branch,
            style::revision(revision.as_str())
        ))
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    url: String,
    branch: String,
    workdir: PathBuf,
    revision: String,
    last_commit_at: String,
    documents: usize,
}

fn cmd_status(config: &PaperSyncConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let report = StatusReport {
        url: config.remote.url.clone(),
        branch: config.remote.branch.clone(),
        workdir: store.workdir().to_path_buf(),
        revision: store.current_revision_id()?.to_string(),
        last_commit_at: store.last_commit_time()?.to_rfc3339(),
        documents: store.list_document_ids()?.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", style::header("papersync"));
    println!("{}", "═".repeat(9));
    println!();
    println!("  Remote     {}", report.url);
    println!("  Branch     {}", report.branch);
    println!("  Revision   {}", style::revision(&report.revision));
    println!("  Committed  {}", report.last_commit_at);
    println!("  Documents  {}", report.documents);
    println!("  Workdir    {}", style::dim(&report.workdir.display().to_string()));
    println!();
    Ok(())
}

fn cmd_docs(config: &PaperSyncConfig) -> Result<()> {
    let store = open_store(config)?;
    let docs = store.list_document_ids()?;

    if docs.is_empty() {
        println!(
            "{}",
            style::warn(&format!("No documents match '{}'", config.remote.document_glob))
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Document", "Lines"]);
    for doc in &docs {
        let lines = store.read_lines(doc)?;
        table.add_row(vec![Cell::new(doc), Cell::new(lines.len())]);
    }

    println!("{}", table);
    let revision = store.current_revision_id()?;
    println!("{} document(s) at {}", docs.len(), style::revision(revision.as_str()));
    Ok(())
}

fn cmd_diff(config: &PaperSyncConfig, doc: &str, commits: usize) -> Result<()> {
    let store = open_store(config)?;
    let doc_id = DocumentId::from(doc);
    let ranges = store
        .diff_since(&doc_id, commits)
        .with_context(|| format!("failed to diff {}", doc))?;

    if ranges.is_empty() {
        println!(
            "{}",
            style::success(&format!("{} unchanged in the last {} commit(s)", doc, commits))
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Start", "End", "Lines"]);
    for range in &ranges {
        table.add_row(vec![
            Cell::new(range.start),
            Cell::new(range.end),
            Cell::new(range.len()),
        ]);
    }

    println!("{}", style::header(&format!("{} changed in the last {} commit(s)", doc, commits)));
    println!("{}", table);
    Ok(())
}

fn cmd_check(config: &PaperSyncConfig, target: &Target) -> Result<()> {
    let mut store = open_store(config)?;
    let detector = ConflictDetector::new(&config.conflict);
    let range = DocumentRange::new(
        target.doc.as_str(),
        store.current_revision_id()?,
        target.selection()?,
    );

    let verdict = detector.assess(&mut store, &[range])?;
    println!("{}", style::verdict(&verdict));
    if !verdict.is_ok() {
        anyhow::bail!("range {} of {} may not be edited now", target.selection()?, target.doc);
    }
    Ok(())
}

fn cmd_apply(
    config: &PaperSyncConfig,
    target: &Target,
    revision: Option<String>,
    content: String,
    comment: bool,
    dry_run: bool,
) -> Result<()> {
    let mut store = open_store(config)?;
    let revision = match revision {
        Some(rev) => RevisionId::new(rev),
        None => store.current_revision_id()?,
    };
    let range = DocumentRange::new(target.doc.as_str(), revision, target.selection()?);
    let edit = if comment {
        EditResult::comment(range, content)
    } else {
        EditResult::replace(range, content)
    };
    let applier = EditApplier::new(config.edit.clone());

    if dry_run {
        let (before, after) = applier.preview(&store, &edit)?;
        let patch = diffy::create_patch(&before.concat(), &after.concat()).to_string();
        println!("{}", style::patch(&patch));
        println!("{}", style::dim("dry run: nothing applied"));
        return Ok(());
    }

    if !applier.apply(&mut store, edit) {
        anyhow::bail!(
            "edit to {} {} was rejected; main is unchanged",
            target.doc,
            target.selection()?
        );
    }
    let revision = store.current_revision_id()?;
    println!(
        "{}",
        style::success(&format!("applied and pushed as {}", style::revision(revision.as_str())))
    );
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# papersync configuration

[general]
log_level = "info"
data_dir = "/tmp/papersync"

[remote]
url = "https://git.example.com/paper.git"
branch = "master"
remote_name = "origin"
document_glob = "**/*.tex"
# token_env = "PAPERSYNC_TOKEN"
# workdir = "/tmp/papersync/paper"

[conflict]
grace_period_secs = 10
last_n_commits = 1

[edit]
author_name = "papersync"
author_email = "papersync@localhost"
commit_message = "AI edit completed."
branch_prefix = "papersync-edit"
retain_originals_as_comments = false
comment_prefix = "% "
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set remote.url to the clone URL of your paper");
    println!("  2. Set token_env and export the token if the remote needs one");
    println!("  3. Validate with: papersync validate --config {}", output.display());
    println!("  4. Fetch it with: papersync sync --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        PaperSyncConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Remote URL    : {}", config.remote.url);
    println!("  Branch        : {}", config.remote.branch);
    println!("  Documents     : {}", config.remote.document_glob);
    println!(
        "  Token         : {}",
        match (&config.remote.token_env, &config.remote.token) {
            (None, _) => "not used",
            (Some(_), Some(_)) => "set",
            (Some(_), None) => "NOT SET",
        }
    );
    println!("  Working copy  : {}", config.workdir().display());
    println!("  Grace period  : {}s", config.conflict.grace_period_secs);
    println!("  Commits back  : {}", config.conflict.last_n_commits);
    println!("  Branch prefix : {}", config.edit.branch_prefix);
    println!();
    println!("Configuration is valid.");

    Ok(())
}
