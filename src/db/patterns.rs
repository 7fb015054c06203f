/// Pattern storage
///
/// Rows are keyed by (pattern_type, pattern_key). A mining pass replaces the
/// whole set for the kinds it produced in one transaction.

use crate::db::{timestamp, Database, PatternRow};
use crate::error::Result;
use crate::intelligence::pattern_miner::{sort_patterns, Pattern, PatternKind};

impl Database {
    /// Upsert `patterns` and drop every other row of the given kinds
    pub async fn replace_patterns(&self, kinds: &[PatternKind], patterns: &[Pattern]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for kind in kinds {
            sqlx::query("DELETE FROM patterns WHERE pattern_type = ?")
                .bind(kind.as_str())
                .execute(&mut *tx)
                .await?;
        }

        for pattern in patterns {
            sqlx::query(
                r#"
                INSERT INTO patterns (pattern_type, pattern_key, frequency, last_seen)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(pattern_type, pattern_key) DO UPDATE SET
                    frequency = excluded.frequency,
                    last_seen = excluded.last_seen
                "#,
            )
            .bind(pattern.kind.as_str())
            .bind(pattern.key.to_string())
            .bind(pattern.frequency)
            .bind(timestamp(&pattern.last_seen))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Stored patterns, most frequent first
    ///
    /// Rows that no longer parse (e.g. a type label from an older build) are
    /// skipped with a warning.
    pub async fn get_patterns(&self, kind: Option<PatternKind>, limit: usize) -> Result<Vec<Pattern>> {
        let rows = if let Some(kind) = kind {
            sqlx::query_as::<_, PatternRow>("SELECT * FROM patterns WHERE pattern_type = ?")
                .bind(kind.as_str())
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query_as::<_, PatternRow>("SELECT * FROM patterns")
                .fetch_all(self.pool())
                .await?
        };

        let mut patterns: Vec<Pattern> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match Pattern::try_from(row) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        tracing::warn!(pattern_id = id, error = %e, "skipping unreadable pattern");
                        None
                    }
                }
            })
            .collect();

        sort_patterns(&mut patterns);
        patterns.truncate(limit);

        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SemanticType;
    use crate::intelligence::pattern_miner::PatternKey;
    use chrono::{TimeZone, Utc};

    fn pair(a: SemanticType, b: SemanticType, frequency: i64) -> Pattern {
        Pattern {
            kind: PatternKind::Sequence2,
            key: PatternKey::Sequence(vec![a, b]),
            frequency,
            last_seen: Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_replace_removes_stale_rows() {
        let db = Database::new_test().await.unwrap();

        let first = vec![
            pair(SemanticType::VersionControl, SemanticType::Testing, 5),
            pair(SemanticType::Testing, SemanticType::Building, 3),
        ];
        db.replace_patterns(&[PatternKind::Sequence2], &first).await.unwrap();
        assert_eq!(db.get_patterns(None, 10).await.unwrap().len(), 2);

        let second = vec![pair(SemanticType::VersionControl, SemanticType::Testing, 6)];
        db.replace_patterns(&[PatternKind::Sequence2], &second).await.unwrap();

        let stored = db.get_patterns(None, 10).await.unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn test_replace_leaves_other_kinds() {
        let db = Database::new_test().await.unwrap();

        let slot = Pattern {
            kind: PatternKind::TimeSlot,
            key: PatternKey::TimeSlot {
                hour: 9,
                semantic_type: SemanticType::Testing,
            },
            frequency: 4,
            last_seen: Utc.with_ymd_and_hms(2025, 2, 1, 9, 30, 0).unwrap(),
        };
        db.replace_patterns(&[PatternKind::TimeSlot], &[slot.clone()])
            .await
            .unwrap();
        db.replace_patterns(&[PatternKind::Sequence2], &[]).await.unwrap();

        let stored = db.get_patterns(Some(PatternKind::TimeSlot), 10).await.unwrap();
        assert_eq!(stored, vec![slot]);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let db = Database::new_test().await.unwrap();

        sqlx::query(
            "INSERT INTO patterns (pattern_type, pattern_key, frequency, last_seen) VALUES ('sequence-2', 'bogus,testing', 9, '2025-01-01T00:00:00.000Z')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        assert!(db.get_patterns(None, 10).await.unwrap().is_empty());
    }
}
