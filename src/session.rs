//! Explicit session context: owns loaded file records and the backup
//! manager, and runs the suggest-verify-backup-write pipeline.
//!
//! All mutation flows through `&mut Session`, which makes the
//! single-writer-per-path rule structural within one session. Callers
//! running multiple sessions over the same paths must serialize them
//! externally; concurrent mutation of one path is undefined otherwise.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::backup::{atomic_write, BackupError, BackupManager, BackupMode, CleanupReport};
use crate::client::{ErrorKind, RetryingClient, Transport};
use crate::patch::{self, Suggestion};

/// One loaded file: the path and the live in-memory content.
///
/// The live content is what suggestions are validated against; it only
/// diverges from disk between an apply and the write that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup failed for {}: {reason}", .path.display())]
    BackupFailed { path: PathBuf, reason: String },

    #[error("model call failed ({kind}): {message}")]
    Call { kind: ErrorKind, message: String },

    #[error("could not parse suggestions from model reply: {0}")]
    Parse(String),

    #[error(transparent)]
    Backup(#[from] BackupError),
}

/// Strategy that produces suggestions for a file. The pipeline does not
/// care whether they come from a model, a fixture, or a rule engine.
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn suggest(&self, path: &Path, content: &str) -> Result<Vec<Suggestion>, SessionError>;
}

/// [`SuggestionSource`] backed by the retrying model client.
///
/// The model is asked to reply with a JSON array of suggestions; a
/// Markdown code fence around the array is tolerated.
pub struct ModelSuggestionSource<T: Transport> {
    client: RetryingClient<T>,
    instruction: String,
}

impl<T: Transport> ModelSuggestionSource<T> {
    pub fn new(client: RetryingClient<T>, instruction: impl Into<String>) -> Self {
        Self {
            client,
            instruction: instruction.into(),
        }
    }

    pub fn client(&self) -> &RetryingClient<T> {
        &self.client
    }
}

#[async_trait]
impl<T: Transport> SuggestionSource for ModelSuggestionSource<T> {
    async fn suggest(&self, path: &Path, content: &str) -> Result<Vec<Suggestion>, SessionError> {
        let prompt = format!(
            "{}\n\nFile: {}\n```\n{}\n```",
            self.instruction,
            path.display(),
            content
        );

        let result = self.client.call(&prompt).await;
        let text = result.into_result().map_err(|(kind, message)| SessionError::Call {
            kind,
            message,
        })?;

        parse_suggestions(&text)
    }
}

/// Parse a model reply as a JSON suggestion array, stripping one
/// surrounding Markdown code fence if present.
pub fn parse_suggestions(reply: &str) -> Result<Vec<Suggestion>, SessionError> {
    let body = strip_code_fence(reply);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(body).map_err(|e| SessionError::Parse(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // First fence line may carry a language tag; the body starts after it.
    let body = rest.split_once('\n').map_or("", |(_, b)| b);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// How `patch_file` writes its result.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Back up before writing. Opting out waives the restore guarantee.
    pub backup: bool,
    /// Apply in memory only; disk and records are left untouched.
    pub dry_run: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            backup: true,
            dry_run: false,
        }
    }
}

/// Per-file pipeline result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub new_content: String,
    pub applied: usize,
    pub skipped: Vec<Suggestion>,
    pub backup_path: Option<PathBuf>,
    pub written: bool,
}

/// Session context owning file records and backups for one run.
#[derive(Debug, Default)]
pub struct Session {
    files: HashMap<PathBuf, FileRecord>,
    backups: BackupManager,
}

impl Session {
    pub fn new(mode: BackupMode) -> Self {
        Self {
            files: HashMap::new(),
            backups: BackupManager::new(mode),
        }
    }

    /// Load a file from disk into the session, replacing any stale record.
    pub fn load(&mut self, path: &Path) -> Result<&FileRecord, SessionError> {
        let content = fs::read_to_string(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let record = FileRecord {
            path: path.to_path_buf(),
            content,
        };
        self.files.insert(path.to_path_buf(), record);
        Ok(&self.files[path])
    }

    pub fn record(&self, path: &Path) -> Option<&FileRecord> {
        self.files.get(path)
    }

    /// Run the full pipeline for one file: fetch suggestions, verify and
    /// apply them, back up, then write atomically.
    ///
    /// The disk write is gated on a successful backup unless the caller
    /// opted out; a failed backup aborts before anything is modified.
    /// Nothing is written when no suggestion applied or in dry-run mode.
    pub async fn patch_file(
        &mut self,
        path: &Path,
        source: &dyn SuggestionSource,
        options: WriteOptions,
    ) -> Result<FileOutcome, SessionError> {
        if !self.files.contains_key(path) {
            self.load(path)?;
        }
        let content = self.files[path].content.clone();

        let suggestions = source.suggest(path, &content).await?;
        debug!(path = %path.display(), count = suggestions.len(), "suggestions received");

        let outcome = patch::apply(&content, &suggestions);

        if options.dry_run || outcome.applied == 0 {
            return Ok(FileOutcome {
                path: path.to_path_buf(),
                new_content: outcome.new_content,
                applied: outcome.applied,
                skipped: outcome.skipped,
                backup_path: None,
                written: false,
            });
        }

        let backup_path = if options.backup {
            let report = self.backups.create_backups(&[path.to_path_buf()]);
            if let Some(failure) = report.failed.into_iter().next() {
                return Err(SessionError::BackupFailed {
                    path: failure.path,
                    reason: failure.error,
                });
            }
            report.successful.into_iter().next().map(|e| e.backup_path)
        } else {
            None
        };

        atomic_write(path, outcome.new_content.as_bytes()).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(record) = self.files.get_mut(path) {
            record.content = outcome.new_content.clone();
        }

        info!(
            path = %path.display(),
            applied = outcome.applied,
            skipped = outcome.skipped.len(),
            "file patched"
        );

        Ok(FileOutcome {
            path: path.to_path_buf(),
            new_content: outcome.new_content,
            applied: outcome.applied,
            skipped: outcome.skipped,
            backup_path,
            written: true,
        })
    }

    /// Undo the most recent backup for `path` and refresh its record.
    pub fn restore(&mut self, path: &Path) -> Result<PathBuf, SessionError> {
        let backup_path = self.backups.restore_from_backup(path)?;
        if self.files.contains_key(path) {
            self.load(path)?;
        }
        Ok(backup_path)
    }

    /// Remove all backups created during this session.
    pub fn cleanup(&mut self) -> CleanupReport {
        self.backups.cleanup_backups()
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }
}
