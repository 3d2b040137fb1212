//! Aipatch: resilient AI-suggestion client and safe patch pipeline
//!
//! Applies AI-suggested, line-ranged text edits to source files without
//! losing data: every suggestion is verified against the exact text it
//! expects to replace, every disk write is preceded by a backup (unless
//! explicitly waived) and performed atomically, and every external model
//! call is rate-limited, retried with backoff, and classified into a
//! closed error vocabulary.
//!
//! # Architecture
//!
//! - [`client`]: the retrying model client with classification,
//!   sliding-window rate limiting, and bounded retries with jittered
//!   backoff
//! - [`patch`]: pure line-ranged patch application with before-text
//!   verification; batches apply in descending start-line order
//! - [`backup`]: session-scoped backup create/restore/cleanup with
//!   partial-results reporting
//! - [`session`]: the context object tying the above together; gates
//!   every write on a successful backup
//!
//! # Safety
//!
//! - Stale suggestions are skipped and reported, never mis-applied
//! - Atomic file writes (tempfile + fsync + rename)
//! - A file is never overwritten without a successful backup, unless the
//!   caller opts out
//! - No raw transport error crosses the client boundary unclassified
//!
//! # Example
//!
//! ```no_run
//! use aipatch::patch::{self, Suggestion};
//!
//! let content = "fn demo() {}\n";
//! let suggestion = Suggestion {
//!     start_line: 1,
//!     end_line: 1,
//!     before: "fn demo() {}".into(),
//!     after: "/// Demo entry point.\nfn demo() {}".into(),
//!     kind: Default::default(),
//!     impact: Default::default(),
//! };
//!
//! let outcome = patch::apply(content, &[suggestion]);
//! assert_eq!(outcome.applied, 1);
//! ```

pub mod backup;
pub mod client;
pub mod patch;
pub mod session;

// Re-exports
pub use backup::{BackupEntry, BackupError, BackupManager, BackupMode, BackupReport, CleanupReport};
pub use client::{
    CallResult, ClientConfig, ClientStatus, ErrorKind, HttpTransport, RateLimiter, RetryingClient,
    Transport, TransportFailure, TransportResponse,
};
pub use patch::{ApplyOutcome, Impact, PatchError, Suggestion, SuggestionKind};
pub use session::{
    parse_suggestions, FileOutcome, FileRecord, ModelSuggestionSource, Session, SessionError,
    SuggestionSource, WriteOptions,
};
