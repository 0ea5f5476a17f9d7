use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{changesets, convert, import, settings, status, users};
use config::{Settings, DEFAULT_SETTINGS_FILE};

#[derive(Parser)]
#[command(name = "vssmigrate")]
#[command(version, about = "Migrate SourceSafe history into Git or Subversion", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Write the log to this file instead of the terminal
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// History database path
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    /// Target repository directory
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON Lines revision log into the history database
    Import {
        /// Revision log file
        file: PathBuf,
    },

    /// Reconstruct and list changesets
    Changesets {
        /// Number of changesets to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Add unmapped authors to the email map file
    Users,

    /// Show the target repository's last converted commit
    Status,

    /// Convert the history into the target repository
    Convert {
        /// Recreate the target repository from scratch
        #[arg(long)]
        reset: bool,

        /// Skip changesets that fail instead of stopping
        #[arg(long)]
        ignore_errors: bool,

        /// Do not ask before deleting the target repository
        #[arg(short, long)]
        yes: bool,
    },

    /// Show or save the effective settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the settings as TOML
    Show,
    /// Write the settings back to the settings file
    Save,
}

/// Installs the subscriber. With a log file, output goes through a
/// non-blocking appender whose guard must live until exit.
fn init_logging(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let Some(path) = log_file else {
        builder.init();
        return Ok(None);
    };

    let (dir, file_name) = split_log_path(path)?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    builder.with_writer(writer).with_ansi(false).init();
    Ok(Some(guard))
}

/// Directory and file name for the appender; a bare name logs to `.`.
fn split_log_path(path: &Path) -> Result<(PathBuf, OsString)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid log file {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name.to_os_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.settings)?;
    if let Some(history) = cli.history {
        settings.history = history;
    }
    if let Some(out) = cli.out {
        settings.out_directory = out;
    }
    if cli.log_file.is_some() {
        settings.log_file = cli.log_file;
    }

    let _log_guard = init_logging(settings.log_file.as_ref())?;

    match cli.command {
        Commands::Import { file } => {
            import::run(&settings, &file)?;
        }
        Commands::Changesets { limit } => {
            changesets::run(&settings, limit)?;
        }
        Commands::Users => {
            users::run(&settings)?;
        }
        Commands::Status => {
            status::run(&settings)?;
        }
        Commands::Convert {
            reset,
            ignore_errors,
            yes,
        } => {
            settings.reset_repo |= reset;
            settings.ignore_errors |= ignore_errors;
            convert::run(&settings, yes).await?;
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show => settings::show(&settings)?,
            SettingsAction::Save => settings::save(&settings, &cli.settings)?,
        },
    }

    Ok(())
}
