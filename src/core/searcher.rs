/// Command searcher with fuzzy matching
///
/// Provides fuzzy search and recent-history lookups. Sensitive commands are
/// never candidates.

use crate::db::{Command, Database, SearchResult};
use crate::error::Result;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use std::sync::Arc;

/// How far back fuzzy search looks
const SEARCH_WINDOW: i64 = 1000;

/// Handles command searching with fuzzy matching
pub struct Searcher {
    db: Arc<Database>,
    matcher: SkimMatcherV2,
}

impl Searcher {
    /// Create a new searcher instance
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            matcher: SkimMatcherV2::default(),
        }
    }

    /// Search commands with fuzzy matching
    ///
    /// # Arguments
    /// * `query` - Search query
    /// * `limit` - Maximum results to return
    ///
    /// # Returns
    /// * `Ok(Vec<SearchResult>)` - Best match first, newer command on equal score
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let commands = self.db.get_searchable_commands(SEARCH_WINDOW).await?;

        let mut results: Vec<SearchResult> = commands
            .into_iter()
            .filter_map(|cmd| {
                self.matcher
                    .fuzzy_match(&cmd.text, query)
                    .map(|score| SearchResult {
                        command: cmd,
                        score: score as f64,
                    })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.command.id.cmp(&a.command.id))
        });
        results.truncate(limit);

        Ok(results)
    }

    /// Most recent commands, newest first, optionally for one session
    pub async fn recent(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<Command>> {
        self.db.get_recent_commands(session_id, limit as i64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{classify, REDACTED};
    use crate::db::{CommandRepository, NewCommand};
    use chrono::Utc;

    async fn setup() -> Searcher {
        let db = Arc::new(Database::new_test().await.unwrap());

        // Insert test data
        let test_commands = vec![
            ("npm install", false),
            ("npm test", false),
            ("cargo build", false),
            ("git commit", false),
            (REDACTED, true),
        ];

        for (seq, (cmd, sensitive)) in test_commands.into_iter().enumerate() {
            db.append(NewCommand {
                session_id: "s1".to_string(),
                seq: seq as i64 + 1,
                text: cmd.to_string(),
                directory: "/test".to_string(),
                semantic_type: classify(cmd),
                sensitive,
                complexity: 1,
                git_branch: None,
                start_time: Utc::now(),
            })
            .await
            .unwrap();
        }

        Searcher::new(db)
    }

    #[tokio::test]
    async fn test_fuzzy_search() {
        let searcher = setup().await;

        let results = searcher.search("npm", 10).await.unwrap();
        assert!(results.len() >= 2);
        assert!(results[0].command.text.contains("npm"));
    }

    #[tokio::test]
    async fn test_fuzzy_abbreviation() {
        let searcher = setup().await;

        // letters in order, gaps allowed
        let results = searcher.search("cbld", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].command.text, "cargo build");

        // skim needs the letters in order, so a swap finds nothing
        assert!(searcher.search("nmp", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sensitive_rows_never_match() {
        let searcher = setup().await;

        let results = searcher.search("REDACTED", 10).await.unwrap();
        assert!(results.iter().all(|r| !r.command.sensitive));
        assert!(searcher.search("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent() {
        let searcher = setup().await;

        let recent = searcher.recent(Some("s1"), 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id > recent[1].id);
        assert!(searcher.recent(Some("other"), 10).await.unwrap().is_empty());
    }
}
