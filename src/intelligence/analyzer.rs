/// Main analyzer orchestrator
///
/// Runs pattern mining and gathers the error-solution and usage summaries
/// into one report.

use crate::db::{Database, DatabaseStats, ErrorSolution};
use crate::error::Result;
use crate::intelligence::error_linker::ErrorSolutionLinker;
use crate::intelligence::pattern_miner::{MinerConfig, MiningReport, PatternMiner};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// How many recent solutions a report carries
const REPORT_SOLUTIONS: usize = 5;

/// Main analyzer
pub struct Analyzer {
    db: Arc<Database>,
    miner: PatternMiner,
    linker: ErrorSolutionLinker,
}

impl Analyzer {
    /// Create a new analyzer
    pub fn new(db: Arc<Database>, config: MinerConfig) -> Self {
        let miner = PatternMiner::new(Arc::clone(&db), config);
        let linker = ErrorSolutionLinker::new(Arc::clone(&db));

        Self { db, miner, linker }
    }

    pub fn miner(&self) -> &PatternMiner {
        &self.miner
    }

    pub fn linker(&self) -> &ErrorSolutionLinker {
        &self.linker
    }

    /// Run full analysis
    ///
    /// Re-mines patterns, then reports on the state of the history
    pub async fn analyze(&self, now: DateTime<Utc>) -> Result<AnalysisReport> {
        let mining = self.miner.mine(now).await?;
        let stats = self.db.stats().await?;
        let recent_solutions = self.linker.solutions(REPORT_SOLUTIONS).await?;

        Ok(AnalysisReport {
            mining,
            stats,
            recent_solutions,
        })
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        self.db.stats().await
    }
}

/// Analysis report
#[derive(Debug)]
pub struct AnalysisReport {
    pub mining: MiningReport,
    pub stats: DatabaseStats,
    pub recent_solutions: Vec<ErrorSolution>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{classify, SemanticType};
    use crate::db::{CommandPatch, CommandRepository, NewCommand};

    async fn setup() -> Analyzer {
        let db = Arc::new(Database::new_test().await.unwrap());

        // Insert test commands
        let mut seq = 0;
        for _ in 0..3 {
            for cmd in &["git add .", "git commit -m 'test'", "git push"] {
                seq += 1;
                let id = db
                    .append(NewCommand {
                        session_id: "s1".to_string(),
                        seq,
                        text: cmd.to_string(),
                        directory: "/test".to_string(),
                        semantic_type: classify(cmd),
                        sensitive: false,
                        complexity: 1,
                        git_branch: None,
                        start_time: Utc::now(),
                    })
                    .await
                    .unwrap();
                db.update(
                    id,
                    CommandPatch {
                        exit_code: if *cmd == "git push" { 1 } else { 0 },
                        duration_ms: 10,
                    },
                )
                .await
                .unwrap();
            }
        }

        Analyzer::new(db, MinerConfig::default())
    }

    #[tokio::test]
    async fn test_analyze() {
        let analyzer = setup().await;

        let report = analyzer.analyze(Utc::now()).await.unwrap();

        assert_eq!(report.mining.commands_scanned, 9);
        assert!(!report.mining.patterns.is_empty());
        assert_eq!(report.stats.total_commands, 9);
        assert_eq!(report.stats.total_patterns as usize, report.mining.patterns.len());

        let vcs = report
            .stats
            .by_type
            .iter()
            .find(|t| t.semantic_type == SemanticType::VersionControl)
            .unwrap();
        assert_eq!(vcs.count, 9);
        assert!((vcs.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
    }
}
