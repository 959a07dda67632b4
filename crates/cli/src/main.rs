//! recipesync command-line tool.
//!
//! Provides subcommands for checking out and refreshing a recipe working copy
//! (`get`), sending local changes back (`update`), working on single files
//! (`get-file`, `update-file`, `delete-file`), inspecting drift (`status`,
//! `diff`) and generating a configuration file.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::Confirm;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use recipesync_core::config::AppConfig;
use recipesync_core::errors::SyncError;
use recipesync_core::plan::{FileChange, PullOptions, PullPreview, PushOptions};
use recipesync_core::remote::DirectoryRemote;
use recipesync_core::scanner::{IgnoreRules, TreeScanner};
use recipesync_core::sync_engine::SyncEngine;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// recipesync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "recipesync",
    version,
    about = "Keep local recipe working copies in sync with a remote recipe store"
)]
struct Cli {
    /// Path to the TOML configuration file.
    /// Defaults to `<config dir>/recipesync/config.toml` when it exists.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote root directory, overriding `remote.root`.
    #[arg(long, global = true)]
    remote: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check out a recipe, or bring remote changes into an existing copy.
    Get {
        /// Recipe name on the remote.
        recipe: String,

        /// Working copy directory. Defaults to `./<recipe>`.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Replace local edits with the remote version.
        #[arg(long)]
        overwrite: bool,

        /// Delete local-only files and directories (requires --overwrite).
        #[arg(long, requires = "overwrite")]
        delete_local: bool,

        /// Do not ask before deleting local files.
        #[arg(short, long)]
        yes: bool,

        /// Show the planned actions without applying them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Send local changes to the remote.
    Update {
        /// Recipe name on the remote.
        recipe: String,

        /// Working copy directory. Defaults to `./<recipe>`.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Commit message recorded with each remote change.
        #[arg(short, long)]
        message: String,

        /// Also delete remote files that were deleted locally.
        #[arg(long)]
        delete_remote: bool,
    },

    /// Replace one local file with the remote copy.
    GetFile {
        /// File path relative to the working copy root.
        path: String,

        /// Working copy directory.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Send one local file to the remote, adding it there if new.
    UpdateFile {
        /// File path relative to the working copy root.
        path: String,

        /// Working copy directory.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Commit message recorded with the remote change.
        #[arg(short, long)]
        message: String,
    },

    /// Delete one file from the remote and the working copy.
    DeleteFile {
        /// File path relative to the working copy root.
        path: String,

        /// Working copy directory.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Commit message recorded with the remote change.
        #[arg(short, long)]
        message: String,
    },

    /// Show how the working copy differs from the remote.
    Status {
        /// Working copy directory.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Show unified diffs (remote to local) of modified files.
    Diff {
        /// Limit output to these paths or directories.
        paths: Vec<String>,

        /// Working copy directory.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Generate a default configuration file.
    InitConfig {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./recipesync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::InitConfig { output } => return cmd_init_config(output),
        Commands::Validate => return cmd_validate(cli.config.as_deref()),
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);
    let engine = build_engine(&config, cli.remote.clone())?;

    match cli.command {
        Commands::Get {
            recipe,
            dir,
            overwrite,
            delete_local,
            yes,
            dry_run,
        } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&recipe));
            let options = PullOptions {
                overwrite,
                delete_local,
                yes,
            };
            cmd_get(&engine, &recipe, &dir, &options, dry_run, cli.json)
        }
        Commands::Update {
            recipe,
            dir,
            message,
            delete_remote,
        } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&recipe));
            let options = PushOptions {
                message,
                delete_remote,
            };
            cmd_update(&engine, &recipe, &dir, &options, cli.json)
        }
        Commands::GetFile { path, dir } => cmd_file(&engine, &dir, cli.json, |recipe| {
            engine.get_file(recipe, &dir, &path)
        }),
        Commands::UpdateFile { path, dir, message } => {
            cmd_file(&engine, &dir, cli.json, |recipe| {
                engine.update_file(recipe, &dir, &path, &message)
            })
        }
        Commands::DeleteFile { path, dir, message } => {
            cmd_file(&engine, &dir, cli.json, |recipe| {
                engine.delete_file(recipe, &dir, &path, &message)
            })
        }
        Commands::Status { dir } => cmd_status(&engine, &dir, cli.json),
        Commands::Diff { paths, dir } => cmd_diff(&engine, &dir, &paths, cli.json),
        Commands::InitConfig { .. } | Commands::Validate => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("recipesync").join("config.toml"))
}

/// Load the explicit config, else the per-user one, else built-in defaults.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };
    let mut config = match path {
        Some(p) => AppConfig::load_from_file(&p)
            .with_context(|| format!("failed to load configuration file {}", p.display()))?,
        None => AppConfig::default(),
    };
    config.resolve_env_vars();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(config: &AppConfig, verbose: u8) {
    let level = match verbose {
        0 => config.log.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn build_engine(config: &AppConfig, remote_root: Option<PathBuf>) -> Result<SyncEngine<DirectoryRemote>> {
    let root = remote_root
        .or_else(|| config.remote.root.clone())
        .context("no remote configured; set remote.root in the config file or pass --remote")?;
    if !root.is_dir() {
        anyhow::bail!("remote root {} is not a directory", root.display());
    }
    debug!(root = %root.display(), "using directory remote");
    let scanner = TreeScanner::new(
        config.sync.metadata_dir.clone(),
        IgnoreRules::new(config.sync.ignore_patterns.clone()),
    );
    Ok(SyncEngine::new(DirectoryRemote::new(root, scanner), &config.sync))
}

/// Recipe name recorded in an existing working copy.
fn recipe_of(engine: &SyncEngine<DirectoryRemote>, dir: &Path) -> Result<String> {
    let wc = engine.working_copy(dir);
    let meta = wc
        .load_meta()
        .context("failed to read working copy metadata")?
        .with_context(|| format!("{} is not a recipe working copy", dir.display()))?;
    Ok(meta.recipe)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    println!("{json}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_get(
    engine: &SyncEngine<DirectoryRemote>,
    recipe: &str,
    dir: &Path,
    options: &PullOptions,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let preview = engine
        .preview_pull(recipe, dir, options)
        .with_context(|| format!("failed to plan get of recipe '{recipe}'"))?;

    if dry_run {
        return print_plan(&preview, json);
    }

    let deletions = preview
        .describe()
        .into_iter()
        .filter(|a| a.action.starts_with("delete_local"))
        .count();
    if deletions > 0 && !options.yes {
        let proceed = Confirm::new()
            .with_prompt(format!(
                "{deletions} local files or directories will be deleted. Continue?"
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !proceed {
            println!("{}", style::warn("Get cancelled. Nothing was changed."));
            return Ok(());
        }
    }

    let report = match engine.apply_preview(&preview) {
        Ok(report) => report,
        Err(e) if e.is_stale() => {
            anyhow::bail!("{e}\nThe working copy or the remote changed while planning. Run 'get' again.")
        }
        Err(e) => return Err(e).with_context(|| format!("get of recipe '{recipe}' failed")),
    };

    if json {
        return print_json(&report);
    }
    print!("{report}");
    let conflicts = report.conflicts();
    if !conflicts.is_empty() {
        println!();
        println!(
            "{}",
            style::warn(&format!("{} files need manual conflict resolution", conflicts.len()))
        );
    }
    Ok(())
}

fn print_plan(preview: &PullPreview, json: bool) -> Result<()> {
    let actions = preview.describe();
    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("Nothing to do");
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!(
            "Planned actions for '{}' ({})",
            preview.recipe, preview.remote_revision
        ))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Action", "Path", "Conflict"]);
    for a in &actions {
        table.add_row(vec![
            Cell::new(&a.action),
            Cell::new(&a.path),
            Cell::new(if a.conflict { "yes" } else { "" }),
        ]);
    }
    println!("{table}");
    println!();
    println!("{}", style::dim("Dry run: nothing was changed."));
    Ok(())
}

fn cmd_update(
    engine: &SyncEngine<DirectoryRemote>,
    recipe: &str,
    dir: &Path,
    options: &PushOptions,
    json: bool,
) -> Result<()> {
    let report = engine
        .push(recipe, dir, options)
        .with_context(|| format!("update of recipe '{recipe}' failed"))?;

    if json {
        return print_json(&report);
    }
    println!("{report}");
    if report.has_issues() {
        anyhow::bail!("{} files could not be updated", report.issues.len());
    }
    Ok(())
}

/// Run a single-file operation against the recipe checked out in `dir`.
fn cmd_file<F>(engine: &SyncEngine<DirectoryRemote>, dir: &Path, json: bool, op: F) -> Result<()>
where
    F: FnOnce(&str) -> Result<FileChange, SyncError>,
{
    let recipe = recipe_of(engine, dir)?;
    let change = op(&recipe).with_context(|| format!("file operation on recipe '{recipe}' failed"))?;

    if json {
        return print_json(&change);
    }
    println!("{}", style::success(&change.to_string()));
    Ok(())
}

fn cmd_status(engine: &SyncEngine<DirectoryRemote>, dir: &Path, json: bool) -> Result<()> {
    let recipe = recipe_of(engine, dir)?;
    let report = engine
        .status(&recipe, dir)
        .with_context(|| format!("status of recipe '{recipe}' failed"))?;

    if json {
        return print_json(&report);
    }
    print!("{report}");
    if report.remote_moved() {
        println!();
        println!(
            "{}",
            style::warn("The remote has changed since the last sync. Run 'get' to bring it in.")
        );
    } else if report.summary.is_clean() {
        println!("{}", style::success("Working copy is in sync"));
    }
    Ok(())
}

fn cmd_diff(
    engine: &SyncEngine<DirectoryRemote>,
    dir: &Path,
    paths: &[String],
    json: bool,
) -> Result<()> {
    let recipe = recipe_of(engine, dir)?;
    let diffs = engine
        .diff(&recipe, dir, paths)
        .with_context(|| format!("diff of recipe '{recipe}' failed"))?;

    if json {
        return print_json(&diffs);
    }
    if diffs.is_empty() {
        println!("No differences");
        return Ok(());
    }
    for diff in &diffs {
        println!("{}", style::header(&diff.path));
        print!("{}", diff.patch);
        println!();
    }
    Ok(())
}

fn cmd_init_config(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, AppConfig::default_toml()).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set remote.root (or remote.root_env) to your recipe store");
    println!("  2. Validate with: recipesync validate --config {}", output.display());
    println!("  3. Check out a recipe: recipesync get <recipe> --config {}", output.display());
    Ok(())
}

fn cmd_validate(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().context("no config directory on this platform; pass --config")?,
    };
    println!("Validating configuration: {}", path.display());
    println!();

    let mut config = AppConfig::load_from_file(&path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.resolve_env_vars();
    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Metadata dir  : {}", config.sync.metadata_dir);
    println!("  Ignore rules  : {}", config.sync.ignore_patterns.len());
    println!(
        "  Base snapshots: {}",
        if config.sync.keep_base_snapshots { "kept" } else { "disabled" }
    );
    println!(
        "  Remote root   : {}",
        config
            .remote
            .root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "NOT SET".to_string())
    );
    println!("  Log level     : {}", config.log.level);
    Ok(())
}
