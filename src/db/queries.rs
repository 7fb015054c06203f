/// SQL query functions for command history
///
/// Commands, error windows, statistics and retention. Sessions, patterns and
/// workflows live in their own files next to this one.

use crate::core::SemanticType;
use crate::db::models::*;
use crate::db::{timestamp, CommandRepository, Database};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[async_trait]
impl CommandRepository for Database {
    async fn append(&self, command: NewCommand) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO commands
                (session_id, seq, text, directory, semantic_type, sensitive, complexity, git_branch, start_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&command.session_id)
        .bind(command.seq)
        .bind(&command.text)
        .bind(&command.directory)
        .bind(command.semantic_type.as_str())
        .bind(command.sensitive)
        .bind(i64::from(command.complexity))
        .bind(&command.git_branch)
        .bind(timestamp(&command.start_time))
        .fetch_one(self.pool())
        .await?;

        Ok(result.get(0))
    }

    async fn update(&self, id: i64, patch: CommandPatch) -> Result<bool> {
        let result = sqlx::query("UPDATE commands SET exit_code = ?, duration_ms = ? WHERE id = ?")
            .bind(patch.exit_code)
            .bind(patch.duration_ms as i64)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan(
        &self,
        session_id: Option<&str>,
        since_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Command>> {
        let since = since_id.unwrap_or(0);

        let commands = if let Some(session) = session_id {
            sqlx::query_as::<_, Command>(
                "SELECT * FROM commands WHERE session_id = ? AND id > ? ORDER BY id ASC LIMIT ?",
            )
            .bind(session)
            .bind(since)
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, Command>("SELECT * FROM commands WHERE id > ? ORDER BY id ASC LIMIT ?")
                .bind(since)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
        };

        Ok(commands)
    }
}

impl Database {
    /// Look a command up by its session-scoped ordering key
    pub async fn find_by_seq(&self, session_id: &str, seq: i64) -> Result<Option<Command>> {
        let command =
            sqlx::query_as::<_, Command>("SELECT * FROM commands WHERE session_id = ? AND seq = ?")
                .bind(session_id)
                .bind(seq)
                .fetch_optional(self.pool())
                .await?;

        Ok(command)
    }

    /// Get recent commands, newest first
    ///
    /// # Arguments
    /// * `session_id` - Optional session filter (None for all sessions)
    /// * `limit` - Maximum number of commands to return
    pub async fn get_recent_commands(
        &self,
        session_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Command>> {
        let commands = if let Some(session) = session_id {
            sqlx::query_as::<_, Command>(
                "SELECT * FROM commands WHERE session_id = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(session)
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, Command>("SELECT * FROM commands ORDER BY id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(self.pool())
                .await?
        };

        Ok(commands)
    }

    /// Newest non-sensitive commands, newest first, for searching
    pub async fn get_searchable_commands(&self, limit: i64) -> Result<Vec<Command>> {
        let commands = sqlx::query_as::<_, Command>(
            "SELECT * FROM commands WHERE sensitive = 0 ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(commands)
    }

    /// Non-sensitive commands after a cursor, ascending, for export
    pub async fn scan_exportable(&self, since_id: i64, limit: i64) -> Result<Vec<Command>> {
        let commands = sqlx::query_as::<_, Command>(
            "SELECT * FROM commands WHERE sensitive = 0 AND id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(since_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(commands)
    }

    /// Most recent non-sensitive command of a given type
    pub async fn latest_of_type(&self, semantic_type: SemanticType) -> Result<Option<Command>> {
        let command = sqlx::query_as::<_, Command>(
            "SELECT * FROM commands WHERE semantic_type = ? AND sensitive = 0 ORDER BY id DESC LIMIT 1",
        )
        .bind(semantic_type.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(command)
    }

    /// Record a freshly opened error window
    ///
    /// A failure already recorded for this (session, seq) is left alone.
    pub async fn open_error_window(
        &self,
        session_id: &str,
        problem_seq: i64,
        problem_text: &str,
        opened_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO error_solutions (session_id, problem_seq, problem_text, opened_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id, problem_seq) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(problem_seq)
        .bind(problem_text)
        .bind(timestamp(&opened_at))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Attach a solution to an open window
    ///
    /// Returns false if the window was never recorded or is already solved.
    pub async fn solve_error_window(
        &self,
        session_id: &str,
        problem_seq: i64,
        solution_seq: i64,
        solution_text: &str,
        solved_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE error_solutions
            SET solution_seq = ?, solution_text = ?, solved_at = ?
            WHERE session_id = ? AND problem_seq = ? AND solution_seq IS NULL
            "#,
        )
        .bind(solution_seq)
        .bind(solution_text)
        .bind(timestamp(&solved_at))
        .bind(session_id)
        .bind(problem_seq)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Solved (problem, solution) pairs, newest first
    pub async fn get_solutions(&self, limit: i64) -> Result<Vec<ErrorSolution>> {
        let rows = sqlx::query_as::<_, ErrorSolution>(
            "SELECT * FROM error_solutions WHERE solution_seq IS NOT NULL ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Solved pairs whose problem text contains `fragment` (case-insensitive)
    pub async fn find_solutions(&self, fragment: &str, limit: i64) -> Result<Vec<ErrorSolution>> {
        let pattern = format!("%{}%", escape_like(fragment));

        let rows = sqlx::query_as::<_, ErrorSolution>(
            r#"
            SELECT * FROM error_solutions
            WHERE solution_seq IS NOT NULL AND problem_text LIKE ? ESCAPE '\'
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Solved pairs for exactly this failing command, newest first
    pub async fn solutions_for_problem(&self, problem_text: &str, limit: i64) -> Result<Vec<ErrorSolution>> {
        let rows = sqlx::query_as::<_, ErrorSolution>(
            r#"
            SELECT * FROM error_solutions
            WHERE solution_seq IS NOT NULL AND problem_text = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(problem_text)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Windows that never got a solution, newest first
    pub async fn get_unsolved(&self, limit: i64) -> Result<Vec<ErrorSolution>> {
        let rows = sqlx::query_as::<_, ErrorSolution>(
            "SELECT * FROM error_solutions WHERE solution_seq IS NULL ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Delete history older than `cutoff`
    ///
    /// Returns the number of commands removed. Sessions are kept.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = timestamp(&cutoff);
        let mut tx = self.pool().begin().await?;

        let deleted = sqlx::query("DELETE FROM commands WHERE start_time < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM error_solutions WHERE opened_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(deleted)
    }

    /// Get database statistics
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let (total_commands,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commands")
            .fetch_one(self.pool())
            .await?;

        let (total_sessions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.pool())
            .await?;

        let (total_patterns,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patterns")
            .fetch_one(self.pool())
            .await?;

        let (total_workflows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflows")
            .fetch_one(self.pool())
            .await?;

        let (solved_errors,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM error_solutions WHERE solution_seq IS NOT NULL",
        )
        .fetch_one(self.pool())
        .await?;

        let (unsolved_errors,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM error_solutions WHERE solution_seq IS NULL")
                .fetch_one(self.pool())
                .await?;

        let rows = sqlx::query(
            r#"
            SELECT semantic_type,
                   COUNT(*) AS total,
                   SUM(CASE WHEN exit_code IS NOT NULL AND exit_code != 0 THEN 1 ELSE 0 END) AS failures
            FROM commands
            GROUP BY semantic_type
            ORDER BY total DESC, semantic_type ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let by_type = rows
            .iter()
            .map(|row| TypeStats {
                semantic_type: SemanticType::from(row.get::<String, _>("semantic_type")),
                count: row.get("total"),
                failures: row.get("failures"),
            })
            .collect();

        Ok(DatabaseStats {
            total_commands,
            total_sessions,
            total_patterns,
            total_workflows,
            solved_errors,
            unsolved_errors,
            by_type,
        })
    }
}

// `%` and `_` in user text match literally
fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub total_commands: i64,
    pub total_sessions: i64,
    pub total_patterns: i64,
    pub total_workflows: i64,
    pub solved_errors: i64,
    pub unsolved_errors: i64,
    pub by_type: Vec<TypeStats>,
}

/// Per semantic type counts
#[derive(Debug, Clone)]
pub struct TypeStats {
    pub semantic_type: SemanticType,
    pub count: i64,
    pub failures: i64,
}

impl TypeStats {
    pub fn failure_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.failures as f64 / self.count as f64
        }
    }
}
