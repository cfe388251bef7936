//! fileferry - background file operations with progress and conflict prompts.
//!
//! Usage:
//!   ferry copy SRC... DEST        Copy files and directories into DEST
//!   ferry move SRC... DEST        Move files and directories into DEST
//!   ferry delete PATH...          Delete files and directory trees
//!   ferry zip SRC... -o DIR       Compress into DIR/<name>.zip
//!   ferry unzip ARCHIVE [DEST]    Extract next to the archive or into DEST
//!   ferry --help                  Show help

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tracing_subscriber::EnvFilter;

use fileferry_core::{Clipboard, DeleteConfirmation, EngineConfig, OperationRequest};
use fileferry_ops::{
    ConflictQuery, Decision, OperationComplete, OperationEvent, OperationExecutor,
    ProgressState,
};

#[derive(Parser)]
#[command(
    name = "fileferry",
    version,
    about = "Copy, move, delete, zip and unzip with progress and conflict prompts",
    long_about = "fileferry runs each operation on a background worker, shows its progress \
                  and asks before replacing or deleting anything.\n\n\
                  Answer prompts interactively, or pass --yes / --no to answer them all."
)]
struct Cli {
    /// Answer every question with yes
    #[arg(short, long, global = true, conflicts_with = "no")]
    yes: bool,

    /// Answer every question with no
    #[arg(short, long, global = true)]
    no: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the final report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy files and directories into a directory
    Copy {
        /// Paths to copy
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Destination directory
        destination: PathBuf,
    },

    /// Move files and directories into a directory
    Move {
        /// Paths to move
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Destination directory
        destination: PathBuf,
    },

    /// Permanently delete files and directory trees
    Delete {
        /// Paths to delete
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },

    /// Compress files and directories into a zip archive
    Zip {
        /// Paths to compress
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Directory to write the archive into (defaults to the first source's parent)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Archive file name (defaults to the first source's name plus .zip)
        #[arg(long)]
        name: Option<String>,
    },

    /// Extract a zip archive into a directory named after it
    Unzip {
        /// Archive to extract
        archive: PathBuf,
        /// Directory to extract into (defaults to the archive's directory)
        destination: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fileferry=info,fileferry_ops=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");
    let answer = match (cli.yes, cli.no) {
        (true, _) => Some(Decision::Yes),
        (_, true) => Some(Decision::No),
        _ => None,
    };

    let mut clipboard = Clipboard::new();
    let request = match cli.command {
        Command::Copy {
            sources,
            destination,
        } => {
            clipboard.copy(sources);
            clipboard
                .paste_request(destination)
                .ok_or_else(|| eyre!("Nothing to copy"))?
        }
        Command::Move {
            sources,
            destination,
        } => {
            clipboard.cut(sources);
            clipboard
                .paste_request(destination)
                .ok_or_else(|| eyre!("Nothing to move"))?
        }
        Command::Delete { targets } => OperationRequest::Delete {
            targets,
            confirmation: if answer == Some(Decision::Yes) {
                DeleteConfirmation::Skip
            } else {
                DeleteConfirmation::Prompt
            },
        },
        Command::Zip {
            sources,
            output,
            name,
        } => {
            let first = sources.first().ok_or_else(|| eyre!("Nothing to compress"))?;
            let output = match output {
                Some(dir) => dir,
                None => parent_dir(first),
            };
            let name = match name {
                Some(name) => name,
                None => default_archive_name(first)?,
            };
            OperationRequest::zip(sources, output, name)
        }
        Command::Unzip {
            archive,
            destination,
        } => {
            let destination = destination.unwrap_or_else(|| parent_dir(&archive));
            OperationRequest::unzip(archive, destination)
        }
    };

    let executor = OperationExecutor::new(config);
    let complete = run(&executor, request, answer)?;
    clipboard.on_paste_finished(complete.is_success());

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&complete).context("Failed to serialize report")?
        );
    } else {
        print_report(&complete);
    }

    Ok(if complete.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    if let Err(reason) = config.validate() {
        bail!("Invalid config {}: {}", path.display(), reason);
    }
    Ok(config)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_archive_name(source: &Path) -> Result<String> {
    let stem = source
        .file_stem()
        .ok_or_else(|| eyre!("Cannot derive an archive name from {}", source.display()))?;
    Ok(format!("{}.zip", stem.to_string_lossy()))
}

/// Drive one operation to completion, rendering progress and answering
/// queries.
fn run(
    executor: &OperationExecutor,
    request: OperationRequest,
    answer: Option<Decision>,
) -> Result<OperationComplete> {
    let mut handle = executor.start(request).context("Failed to start operation")?;
    let mut complete = None;

    while let Some(event) = handle.blocking_recv() {
        match event {
            OperationEvent::Progress(state) => render_progress(&state),
            OperationEvent::Conflict(query) => {
                clear_progress_line();
                let decision = match answer {
                    Some(decision) => decision,
                    None => prompt(&query)?,
                };
                handle.answer(decision);
            }
            OperationEvent::Complete(done) => {
                clear_progress_line();
                complete = Some(done);
            }
        }
    }

    complete.ok_or_else(|| eyre!("Operation ended without a report"))
}

fn prompt(query: &ConflictQuery) -> Result<Decision> {
    let mut stderr = io::stderr();
    write!(stderr, "{}: {} [y/N] ", query.title, query.message)?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read answer")?;
    Ok(match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Yes,
        _ => Decision::No,
    })
}

fn render_progress(state: &ProgressState) {
    eprint!(
        "\r\x1b[2K{} {:>3.0}%  {} / {}  {}",
        state.title,
        state.percentage(),
        format_size(state.processed_bytes),
        format_size(state.total_bytes),
        state.current.as_deref().unwrap_or("")
    );
}

fn clear_progress_line() {
    eprint!("\r\x1b[2K");
}

fn print_report(complete: &OperationComplete) {
    println!("{}", complete.summary());
    if complete.bytes_processed > 0 {
        println!(" {} processed", format_size(complete.bytes_processed));
    }
    for error in &complete.errors {
        println!(" ! {}", error);
    }
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
