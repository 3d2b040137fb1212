use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use aipatch::{
    BackupMode, ClientConfig, HttpTransport, ModelSuggestionSource, RetryingClient, Session,
    WriteOptions,
};

const DOCUMENT_INSTRUCTION: &str = "You are a code documentation assistant. Propose documentation \
comments for the file below. Reply with only a JSON array of suggestions; each suggestion has \
start_line, end_line (1-indexed, inclusive), before (the exact current text at that range), \
after (the replacement), kind, and impact (low/medium/high).";

const REFACTOR_INSTRUCTION: &str = "You are a code refactoring assistant. Propose small, safe \
refactorings for the file below. Reply with only a JSON array of suggestions; each suggestion has \
start_line, end_line (1-indexed, inclusive), before (the exact current text at that range), \
after (the replacement), kind, and impact (low/medium/high).";

#[derive(Parser)]
#[command(name = "aipatch")]
#[command(about = "Apply AI-suggested documentation and refactoring patches safely", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Client flags shared by the commands that talk to the model.
#[derive(Args, Clone)]
struct ClientArgs {
    /// API key for the model endpoint
    #[arg(long, env = "AIPATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the model endpoint
    #[arg(long, env = "AIPATCH_ENDPOINT", default_value = "https://api.example.com")]
    endpoint: String,

    /// Model identifier
    #[arg(long, default_value = "gemini-1.5-flash")]
    model: String,

    /// Per-attempt timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Retries on top of the initial attempt
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Maximum calls per rate-limit window
    #[arg(long, default_value_t = 10)]
    rate_limit: usize,

    /// Rate-limit window in seconds
    #[arg(long, default_value_t = 60)]
    window_secs: u64,

    /// Refund rate-limit quota consumed by failed retryable attempts
    #[arg(long)]
    refund_on_retry: bool,
}

impl ClientArgs {
    fn to_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_retries: self.max_retries,
            base_timeout: Duration::from_millis(self.timeout_ms),
            max_calls_per_window: self.rate_limit,
            window: Duration::from_secs(self.window_secs),
            refund_on_retryable_failure: self.refund_on_retry,
            ..ClientConfig::default()
        }
    }
}

/// Write-behavior flags shared by document and refactor.
#[derive(Args, Clone)]
struct RunArgs {
    /// Files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Dry run - show what would change without modifying files
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Skip backups before writing (waives the restore guarantee)
    #[arg(long)]
    no_backup: bool,

    /// Keep a timestamped backup per run instead of overwriting one .bak
    #[arg(long)]
    timestamped: bool,

    /// Show unified diff of changes
    #[arg(short, long)]
    diff: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the model for documentation suggestions and apply them
    Document {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Ask the model for refactoring suggestions and apply them
    Refactor {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Restore files from their most recent backup
    Restore {
        /// Files to restore
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove .bak files under a directory
    Cleanup {
        /// Directory to scan
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Show the client configuration surface
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Document { run, client } => cmd_run(run, client, DOCUMENT_INSTRUCTION).await,
        Commands::Refactor { run, client } => cmd_run(run, client, REFACTOR_INSTRUCTION).await,
        Commands::Restore { files } => cmd_restore(&files),
        Commands::Cleanup { dir } => cmd_cleanup(&dir),
        Commands::Status { client } => cmd_status(&client),
    }
}

async fn cmd_run(run: RunArgs, client: ClientArgs, instruction: &str) -> Result<()> {
    let transport = HttpTransport::new(
        &client.endpoint,
        client.api_key.as_deref().unwrap_or_default(),
        &client.model,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let model_client = RetryingClient::new(transport, client.to_config());
    let source = ModelSuggestionSource::new(model_client, instruction);

    let mode = if run.timestamped {
        BackupMode::Timestamped
    } else {
        BackupMode::Overwrite
    };
    let mut session = Session::new(mode);

    let options = WriteOptions {
        backup: !run.no_backup,
        dry_run: run.dry_run,
    };

    if run.dry_run {
        println!("{}", "[DRY RUN - no files will be modified]".cyan());
    }

    let mut total_applied = 0;
    let mut total_skipped = 0;
    let mut total_failed = 0;

    for file in &run.files {
        let original = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                total_failed += 1;
                continue;
            }
        };

        match session.patch_file(file, &source, options).await {
            Ok(outcome) => {
                if outcome.applied > 0 {
                    let verb = if run.dry_run { "Would apply" } else { "Applied" };
                    println!(
                        "{} {}: {} {} suggestion(s), {} skipped",
                        "✓".green(),
                        file.display(),
                        verb,
                        outcome.applied,
                        outcome.skipped.len()
                    );
                    if let Some(backup) = &outcome.backup_path {
                        println!("  Backup: {}", backup.display().to_string().dimmed());
                    }
                    if run.diff || run.dry_run {
                        display_diff(file, &original, &outcome.new_content);
                    }
                } else if outcome.skipped.is_empty() {
                    println!("{} {}: No suggestions", "⊙".yellow(), file.display());
                } else {
                    println!(
                        "{} {}: All {} suggestion(s) stale, nothing applied",
                        "⊘".cyan(),
                        file.display(),
                        outcome.skipped.len()
                    );
                }
                total_applied += outcome.applied;
                total_skipped += outcome.skipped.len();
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                total_failed += 1;
            }
        }
    }

    println!();
    println!(
        "{} applied, {} skipped, {} file(s) failed",
        total_applied.to_string().green(),
        total_skipped.to_string().yellow(),
        total_failed.to_string().red()
    );

    if total_failed > 0 {
        anyhow::bail!("{total_failed} file(s) failed");
    }
    Ok(())
}

fn cmd_restore(files: &[PathBuf]) -> Result<()> {
    let mut session = Session::new(BackupMode::Overwrite);
    let mut failed = 0;

    for file in files {
        match session.restore(file) {
            Ok(backup) => println!(
                "{} {}: restored from {}",
                "✓".green(),
                file.display(),
                backup.display()
            ),
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} file(s) could not be restored");
    }
    Ok(())
}

fn cmd_cleanup(dir: &Path) -> Result<()> {
    let mut cleaned = 0;
    let mut failed = 0;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|s| s.to_str()) != Some("bak") {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                println!("{} {}", "✓".green(), entry.path().display());
                cleaned += 1;
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), entry.path().display(), e);
                failed += 1;
            }
        }
    }

    println!("{cleaned} backup(s) removed");
    if failed > 0 {
        anyhow::bail!("{failed} backup(s) could not be removed");
    }
    Ok(())
}

fn cmd_status(client: &ClientArgs) -> Result<()> {
    let transport = HttpTransport::new(
        &client.endpoint,
        client.api_key.as_deref().unwrap_or_default(),
        &client.model,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let model_client = RetryingClient::new(transport, client.to_config());
    let status = model_client.status();

    println!("API key:     {}", if status.has_api_key { "configured".green() } else { "missing".red() });
    println!("Model:       {}", status.model);
    println!("Timeout:     {}ms", status.timeout.as_millis());
    println!("Max retries: {}", status.max_retries);
    println!(
        "Rate limit:  {} calls per {}s",
        status.rate_limit,
        status.window.as_secs()
    );
    Ok(())
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
    println!();
}
