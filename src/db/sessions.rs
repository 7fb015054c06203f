/// Session snapshot persistence
///
/// The live state machine is in `core::session`; this is where it is written
/// down so a later process can pick up the same session.

use crate::db::{timestamp, Database, SessionRecord};
use crate::error::Result;

impl Database {
    /// Insert or overwrite the snapshot for a session
    ///
    /// Once a session is stored as ended it is never reopened or changed.
    pub async fn save_session(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, shell, start_time, end_time, status, next_seq, pending_seq, window_problem_seq, window_opened_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                shell = excluded.shell,
                end_time = excluded.end_time,
                status = excluded.status,
                next_seq = excluded.next_seq,
                pending_seq = excluded.pending_seq,
                window_problem_seq = excluded.window_problem_seq,
                window_opened_at = excluded.window_opened_at
            WHERE sessions.status != 'ended'
            "#,
        )
        .bind(&record.id)
        .bind(&record.shell)
        .bind(timestamp(&record.start_time))
        .bind(record.end_time.as_ref().map(timestamp))
        .bind(&record.status)
        .bind(record.next_seq)
        .bind(record.pending_seq)
        .bind(record.window_problem_seq)
        .bind(record.window_opened_at.as_ref().map(timestamp))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(record)
    }

    /// Most recently started sessions first
    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<SessionRecord>> {
        let records = sqlx::query_as::<_, SessionRecord>(
            "SELECT * FROM sessions ORDER BY start_time DESC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(status: &str, next_seq: i64) -> SessionRecord {
        SessionRecord {
            id: "s1".to_string(),
            shell: "zsh".to_string(),
            start_time: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
            end_time: None,
            status: status.to_string(),
            next_seq,
            pending_seq: Some(next_seq - 1),
            window_problem_seq: None,
            window_opened_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let db = Database::new_test().await.unwrap();

        db.save_session(&record("active", 2)).await.unwrap();
        db.save_session(&record("active", 5)).await.unwrap();

        let loaded = db.load_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.next_seq, 5);
        assert_eq!(loaded.pending_seq, Some(4));
        assert_eq!(loaded.shell, "zsh");
        assert!(db.load_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ended_session_is_immutable() {
        let db = Database::new_test().await.unwrap();

        let mut ended = record("ended", 3);
        ended.end_time = Some(Utc::now());
        ended.pending_seq = None;
        db.save_session(&ended).await.unwrap();

        db.save_session(&record("active", 9)).await.unwrap();

        let loaded = db.load_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, "ended");
        assert_eq!(loaded.next_seq, 3);
    }
}
