// Workflow operations
//
// Create, look up, run and derive workflows. Storage goes through the
// Database impl in db/workflows.rs, execution through a CommandRunner.

use crate::db::Database;
use crate::error::{Result, TrailError};
use crate::intelligence::pattern_miner::Pattern;
use crate::workflow::runner::{run_steps, CommandRunner, RunReport, ShellRunner};
use crate::workflow::Workflow;
use chrono::Utc;
use std::sync::Arc;

pub struct WorkflowManager {
    db: Arc<Database>,
    runner: Arc<dyn CommandRunner>,
}

impl WorkflowManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_runner(db, Arc::new(ShellRunner::new()))
    }

    pub fn with_runner(db: Arc<Database>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { db, runner }
    }

    /// Create a workflow, replacing any existing one with the same name
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        commands: Vec<String>,
    ) -> Result<Workflow> {
        let workflow = Workflow::new(name, description, commands)?;

        if let Some(existing) = self.db.get_workflow(name).await? {
            tracing::info!(
                workflow = name,
                previous_runs = existing.times_used,
                "replacing existing workflow"
            );
        }

        self.db.save_workflow(&workflow).await?;
        Ok(workflow)
    }

    pub async fn list(&self) -> Result<Vec<Workflow>> {
        self.db.list_workflows().await
    }

    pub async fn get(&self, name: &str) -> Result<Option<Workflow>> {
        self.db.get_workflow(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.db.delete_workflow(name).await
    }

    /// Run every step in order, stopping at the first failure
    ///
    /// Exactly one statistics update is recorded per run.
    pub async fn run(&self, name: &str) -> Result<RunReport> {
        let workflow = self
            .db
            .get_workflow(name)
            .await?
            .ok_or_else(|| TrailError::WorkflowNotFound(name.to_string()))?;

        let steps = run_steps(self.runner.as_ref(), &workflow.commands).await;
        let overall_success =
            steps.len() == workflow.commands.len() && steps.iter().all(|s| s.succeeded());

        let (times_used, success_rate) = self
            .db
            .record_workflow_run(name, overall_success, Utc::now())
            .await?
            .ok_or_else(|| TrailError::WorkflowNotFound(name.to_string()))?;

        tracing::info!(
            workflow = name,
            success = overall_success,
            times_used,
            success_rate,
            "workflow run finished"
        );

        Ok(RunReport {
            workflow: workflow.name,
            steps,
            overall_success,
            times_used,
            success_rate,
        })
    }

    /// Turn a sequence pattern into a concrete workflow
    ///
    /// Each slot gets the most recent non-sensitive command of that type, so
    /// calling this again later can pick different commands.
    pub async fn from_pattern(
        &self,
        pattern: &Pattern,
        name: &str,
        description: &str,
    ) -> Result<Workflow> {
        let types = pattern
            .sequence()
            .ok_or_else(|| TrailError::UnsupportedPattern(format!("{} {}", pattern.kind, pattern.key)))?;

        let mut commands = Vec::with_capacity(types.len());
        for (slot, semantic_type) in types.iter().enumerate() {
            let example = self
                .db
                .latest_of_type(*semantic_type)
                .await?
                .ok_or_else(|| TrailError::NoExample {
                    slot,
                    semantic_type: semantic_type.to_string(),
                })?;
            commands.push(example.text);
        }

        let description = if description.trim().is_empty() {
            format!("Derived from {} pattern {}", pattern.kind, pattern.key)
        } else {
            description.to_string()
        };

        self.create(name, &description, commands).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{classify, SemanticType};
    use crate::db::{CommandRepository, NewCommand};
    use crate::intelligence::pattern_miner::{PatternKey, PatternKind};
    use crate::workflow::runner::tests::ScriptedRunner;

    async fn manager_with(runner: ScriptedRunner) -> (WorkflowManager, Arc<ScriptedRunner>, Arc<Database>) {
        let db = Arc::new(Database::new_test().await.unwrap());
        let runner = Arc::new(runner);
        let manager = WorkflowManager::with_runner(Arc::clone(&db), runner.clone());
        (manager, runner, db)
    }

    fn commands(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    async fn record(db: &Database, seq: i64, text: &str, sensitive: bool) {
        db.append(NewCommand {
            session_id: "s1".to_string(),
            seq,
            text: text.to_string(),
            directory: "/repo".to_string(),
            semantic_type: classify(text),
            sensitive,
            complexity: 1,
            git_branch: None,
            start_time: Utc::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_run_three_times_tracks_rate() {
        let (manager, runner, _) = manager_with(ScriptedRunner::new(&[])).await;

        manager
            .create("ci", "", commands(&["cargo build", "cargo test"]))
            .await
            .unwrap();

        assert!(manager.run("ci").await.unwrap().overall_success);
        assert!(manager.run("ci").await.unwrap().overall_success);

        runner.set("cargo test", 101);
        let report = manager.run("ci").await.unwrap();
        assert!(!report.overall_success);
        assert_eq!(report.times_used, 3);

        let workflow = manager.get("ci").await.unwrap().unwrap();
        assert_eq!(workflow.times_used, 3);
        assert!((workflow.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failing_step_stops_run() {
        let scripted = ScriptedRunner::new(&[("npm test", 1)]);
        let (manager, runner, _) = manager_with(scripted).await;

        manager
            .create("release", "", commands(&["npm ci", "npm test", "npm publish"]))
            .await
            .unwrap();

        let report = manager.run("release").await.unwrap();
        assert!(!report.overall_success);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.times_used, 1);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(*runner.ran.lock().unwrap(), vec!["npm ci", "npm test"]);
    }

    #[tokio::test]
    async fn test_run_unknown_workflow() {
        let (manager, _, _) = manager_with(ScriptedRunner::new(&[])).await;

        assert!(matches!(
            manager.run("nope").await,
            Err(TrailError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_validates() {
        let (manager, _, _) = manager_with(ScriptedRunner::new(&[])).await;

        assert!(matches!(
            manager.create("bad name!", "", commands(&["ls"])).await,
            Err(TrailError::Validation(_))
        ));
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_pattern_uses_latest_examples() {
        let (manager, _, db) = manager_with(ScriptedRunner::new(&[])).await;
        record(&db, 1, "git pull", false).await;
        record(&db, 2, "cargo test", false).await;
        record(&db, 3, "git push origin main", false).await;
        record(&db, 4, "git push --token=abc", true).await;

        let pattern = Pattern {
            kind: PatternKind::Sequence2,
            key: PatternKey::Sequence(vec![SemanticType::VersionControl, SemanticType::Testing]),
            frequency: 3,
            last_seen: Utc::now(),
        };

        let workflow = manager.from_pattern(&pattern, "sync-test", "").await.unwrap();
        assert_eq!(workflow.commands, vec!["git push origin main", "cargo test"]);
        assert!(workflow.description.contains("version_control,testing"));
    }

    #[tokio::test]
    async fn test_from_pattern_missing_example() {
        let (manager, _, db) = manager_with(ScriptedRunner::new(&[])).await;
        record(&db, 1, "git pull", false).await;

        let pattern = Pattern {
            kind: PatternKind::Sequence2,
            key: PatternKey::Sequence(vec![SemanticType::VersionControl, SemanticType::Container]),
            frequency: 3,
            last_seen: Utc::now(),
        };

        match manager.from_pattern(&pattern, "nope", "").await {
            Err(TrailError::NoExample { slot, semantic_type }) => {
                assert_eq!(slot, 1);
                assert_eq!(semantic_type, "container");
            }
            other => panic!("expected NoExample, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_from_time_slot_is_unsupported() {
        let (manager, _, _) = manager_with(ScriptedRunner::new(&[])).await;

        let pattern = Pattern {
            kind: PatternKind::TimeSlot,
            key: PatternKey::TimeSlot {
                hour: 9,
                semantic_type: SemanticType::Testing,
            },
            frequency: 3,
            last_seen: Utc::now(),
        };

        assert!(matches!(
            manager.from_pattern(&pattern, "slot", "").await,
            Err(TrailError::UnsupportedPattern(_))
        ));
    }
}
