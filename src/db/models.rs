/// Data models for database entities
///
/// Row structs map 1:1 to tables and use sqlx `FromRow`. Timestamps are
/// written as fixed-width RFC 3339 text (see `db::timestamp`) so that string
/// comparison in SQL matches chronological order.

use crate::core::SemanticType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recorded shell command
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Command {
    pub id: i64,
    pub session_id: String,
    /// Position within the session, the per-session ordering key
    pub seq: i64,
    pub text: String,
    pub directory: String,
    #[sqlx(try_from = "String")]
    pub semantic_type: SemanticType,
    pub sensitive: bool,
    pub complexity: i64,
    pub git_branch: Option<String>,
    pub start_time: DateTime<Utc>,
    pub exit_code: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl Command {
    /// Still waiting for its post-execution event
    pub fn is_open(&self) -> bool {
        self.exit_code.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Input for appending a freshly opened command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommand {
    pub session_id: String,
    pub seq: i64,
    pub text: String,
    pub directory: String,
    pub semantic_type: SemanticType,
    pub sensitive: bool,
    pub complexity: u8,
    pub git_branch: Option<String>,
    pub start_time: DateTime<Utc>,
}

/// Fields filled in when a command closes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CommandPatch {
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Persisted snapshot of a session and its state machine slots
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub shell: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub next_seq: i64,
    pub pending_seq: Option<i64>,
    pub window_problem_seq: Option<i64>,
    pub window_opened_at: Option<DateTime<Utc>>,
}

/// A failing command and, once found, the command that followed it successfully
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ErrorSolution {
    pub id: i64,
    pub session_id: String,
    pub problem_seq: i64,
    pub problem_text: String,
    pub solution_seq: Option<i64>,
    pub solution_text: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub solved_at: Option<DateTime<Utc>>,
}

impl ErrorSolution {
    pub fn is_solved(&self) -> bool {
        self.solution_seq.is_some()
    }
}

/// Stored pattern row, converted into `intelligence::Pattern` on read
#[derive(Debug, Clone, FromRow)]
pub struct PatternRow {
    pub id: i64,
    pub pattern_type: String,
    pub pattern_key: String,
    pub frequency: i64,
    pub last_seen: DateTime<Utc>,
}

/// Stored workflow header row
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub name: String,
    pub description: String,
    pub times_used: i64,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Search results with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub command: Command,
    pub score: f64, // Fuzzy match score
}
