// End-to-end tests through the public API: capture, link, mine, workflows

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use termtrail_lib::core::{CapturePipeline, CapturePolicy, Searcher};
use termtrail_lib::db::CommandRepository;
use termtrail_lib::intelligence::{
    ErrorSolutionLinker, MinerConfig, PatternKind, PatternMiner,
};
use termtrail_lib::shell::Shell;
use termtrail_lib::workflow::{CommandRunner, WorkflowManager};
use termtrail_lib::{Database, Result};

async fn setup() -> (Arc<Database>, CapturePipeline) {
    let db = Arc::new(Database::new_test().await.unwrap());
    let pipeline = CapturePipeline::new(Arc::clone(&db), CapturePolicy::new()).unwrap();
    (db, pipeline)
}

fn run(pipeline: &CapturePipeline, session: &str, text: &str, exit_code: i32) {
    pipeline.open(text, "/home/dev/project", session).unwrap();
    pipeline.close(session, exit_code, 20).unwrap();
}

#[tokio::test]
async fn next_success_becomes_the_solution() {
    let (db, pipeline) = setup().await;
    let session = pipeline.attach(Shell::Zsh);

    run(&pipeline, &session, "git status", 0);
    run(&pipeline, &session, "git push", 1);
    run(&pipeline, &session, "npm test", 0);
    run(&pipeline, &session, "git push --force", 0);
    pipeline.flush().await;

    let commands = db.scan(Some(session.as_str()), None, 100).await.unwrap();
    assert_eq!(commands.len(), 4);
    assert!(commands.iter().all(|c| c.exit_code.is_some() && c.duration_ms.is_some()));

    let linker = ErrorSolutionLinker::new(Arc::clone(&db));
    let solutions = linker.solutions(10).await.unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].problem_text, "git push");
    // the heuristic picks the next success, not the real fix
    assert_eq!(solutions[0].solution_text.as_deref(), Some("npm test"));
    assert!(linker.unsolved(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn superseded_and_session_end_windows_stay_unsolved() {
    let (db, pipeline) = setup().await;
    let a = pipeline.attach(Shell::Bash);
    let b = pipeline.attach(Shell::Bash);

    run(&pipeline, &a, "make", 2);
    run(&pipeline, &a, "make install", 2);
    run(&pipeline, &a, "make clean", 0);

    run(&pipeline, &b, "cargo build", 101);
    pipeline.detach(&b);

    // a later session never solves an earlier session's window
    let c = pipeline.attach(Shell::Bash);
    run(&pipeline, &c, "cargo build", 0);
    pipeline.shutdown().await;

    let linker = ErrorSolutionLinker::new(Arc::clone(&db));
    let solved = linker.solutions(10).await.unwrap();
    assert_eq!(solved.len(), 1);
    assert_eq!(solved[0].problem_text, "make install");

    let mut unsolved: Vec<String> = linker
        .unsolved(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.problem_text)
        .collect();
    unsolved.sort();
    assert_eq!(unsolved, vec!["cargo build", "make"]);
}

#[tokio::test]
async fn sensitive_commands_are_redacted_and_unsearchable() {
    let (db, pipeline) = setup().await;
    let session = pipeline.attach(Shell::Zsh);

    run(&pipeline, &session, "export API_KEY=xyz", 0);
    run(&pipeline, &session, "echo hello", 0);
    pipeline.flush().await;

    let stored = db.scan(Some(session.as_str()), None, 10).await.unwrap();
    assert!(stored[0].sensitive);
    assert!(!stored[0].text.contains("xyz"));

    let results = Searcher::new(Arc::clone(&db)).search("API_KEY", 10).await.unwrap();
    assert!(results.iter().all(|r| !r.command.sensitive));
}

#[tokio::test]
async fn mining_twice_gives_identical_rows() {
    let (db, pipeline) = setup().await;

    for _ in 0..3 {
        let session = pipeline.attach(Shell::Zsh);
        run(&pipeline, &session, "git pull", 0);
        run(&pipeline, &session, "cargo test", 0);
        run(&pipeline, &session, "git push", 0);
    }
    pipeline.flush().await;

    let miner = PatternMiner::new(Arc::clone(&db), MinerConfig::default());
    let now = Utc::now();

    let first = miner.mine(now).await.unwrap();
    let stored_first = miner.list(None, 100).await.unwrap();
    let second = miner.mine(now).await.unwrap();
    let stored_second = miner.list(None, 100).await.unwrap();

    assert_eq!(first.patterns, second.patterns);
    assert_eq!(stored_first, stored_second);

    let triples = miner.list(Some(PatternKind::Sequence3), 10).await.unwrap();
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].key.to_string(), "version_control,testing,version_control");
    assert_eq!(triples[0].frequency, 3);
}

/// Succeeds twice, then fails every time
struct FlakyRunner {
    calls: AtomicUsize,
}

#[async_trait]
impl CommandRunner for FlakyRunner {
    async fn run(&self, _command: &str) -> Result<i32> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if n < 2 { 0 } else { 1 })
    }
}

#[tokio::test]
async fn workflow_stats_after_three_runs() {
    let db = Arc::new(Database::new_test().await.unwrap());
    let runner = Arc::new(FlakyRunner {
        calls: AtomicUsize::new(0),
    });
    let manager = WorkflowManager::with_runner(Arc::clone(&db), runner);

    manager
        .create("deploy-prod_v2", "ship it", vec!["./deploy.sh".to_string()])
        .await
        .unwrap();

    for _ in 0..3 {
        manager.run("deploy-prod_v2").await.unwrap();
    }

    let workflow = manager.get("deploy-prod_v2").await.unwrap().unwrap();
    assert_eq!(workflow.times_used, 3);
    assert!((workflow.success_rate - 0.667).abs() < 0.001);

    assert!(manager
        .create("bad name!", "", vec!["ls".to_string()])
        .await
        .is_err());
}

#[tokio::test]
async fn pattern_to_workflow() {
    let (db, pipeline) = setup().await;

    for _ in 0..3 {
        let session = pipeline.attach(Shell::Fish);
        run(&pipeline, &session, "docker compose up -d", 0);
        run(&pipeline, &session, "pytest -x", 0);
    }
    pipeline.flush().await;

    let miner = PatternMiner::new(Arc::clone(&db), MinerConfig::default());
    miner.mine(Utc::now()).await.unwrap();
    let pairs = miner.list(Some(PatternKind::Sequence2), 10).await.unwrap();
    let pattern = pairs
        .iter()
        .find(|p| p.key.to_string() == "container,testing")
        .unwrap();

    let manager = WorkflowManager::new(Arc::clone(&db));
    let workflow = manager.from_pattern(pattern, "stack-test", "").await.unwrap();
    assert_eq!(workflow.commands, vec!["docker compose up -d", "pytest -x"]);
}
