// Background persistence for captured commands
//
// Hooks must return right away, so every write is queued as a job. Each
// session has its own queue and worker task: jobs from one session are applied
// strictly in the order they were queued, different sessions run independently.
//
// A job that fails is retried once, then dropped. The shell's own history still
// has the command, we just won't remember it.

use crate::core::classifier::{classify, complexity, is_sensitive, redact};
use crate::db::{CommandPatch, CommandRepository, Database, NewCommand, SessionRecord};
use crate::error::{Result, TrailError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// One unit of persistence work
#[derive(Debug, Clone)]
pub enum PersistJob {
    OpenCommand {
        session_id: String,
        seq: i64,
        text: String,
        directory: String,
        started_at: DateTime<Utc>,
    },
    CloseCommand {
        session_id: String,
        seq: i64,
        patch: CommandPatch,
    },
    OpenErrorWindow {
        session_id: String,
        problem_seq: i64,
        opened_at: DateTime<Utc>,
    },
    SolveErrorWindow {
        session_id: String,
        problem_seq: i64,
        solution_seq: i64,
        solved_at: DateTime<Utc>,
    },
    SaveSession(SessionRecord),
}

impl PersistJob {
    pub fn session_id(&self) -> &str {
        match self {
            PersistJob::OpenCommand { session_id, .. }
            | PersistJob::CloseCommand { session_id, .. }
            | PersistJob::OpenErrorWindow { session_id, .. }
            | PersistJob::SolveErrorWindow { session_id, .. } => session_id,
            PersistJob::SaveSession(record) => &record.id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PersistJob::OpenCommand { .. } => "open_command",
            PersistJob::CloseCommand { .. } => "close_command",
            PersistJob::OpenErrorWindow { .. } => "open_error_window",
            PersistJob::SolveErrorWindow { .. } => "solve_error_window",
            PersistJob::SaveSession(_) => "save_session",
        }
    }
}

enum Envelope {
    Job(PersistJob),
    Flush(oneshot::Sender<()>),
}

struct SessionQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    worker: JoinHandle<()>,
}

pub struct PersistenceDispatcher {
    db: Arc<Database>,
    handle: Handle,
    queues: Mutex<HashMap<String, SessionQueue>>,
    // workers of closed sessions still draining
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl PersistenceDispatcher {
    /// Must be called from inside a tokio runtime
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| TrailError::Runtime(format!("persistence needs a tokio runtime: {}", e)))?;

        Ok(Self {
            db,
            handle,
            queues: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
        })
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, SessionQueue>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retired(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retired.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a job behind everything else queued for its session
    ///
    /// Never blocks and never fails.
    pub fn dispatch(&self, job: PersistJob) {
        let session_id = job.session_id().to_string();
        let mut queues = self.queues();

        let envelope = Envelope::Job(job);
        let envelope = match queues.get(&session_id) {
            Some(queue) => match queue.tx.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };

        // no queue yet, or its worker is gone
        let queue = self.spawn_queue(&session_id);
        if queue.tx.send(envelope).is_err() {
            tracing::warn!(session_id = %session_id, "persistence worker unavailable, job dropped");
        }
        if let Some(old) = queues.insert(session_id, queue) {
            self.retired().push(old.worker);
        }
    }

    fn spawn_queue(&self, session_id: &str) -> SessionQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = self.handle.spawn(run_worker(
            Arc::clone(&self.db),
            session_id.to_string(),
            rx,
        ));

        SessionQueue { tx, worker }
    }

    /// Wait until every job queued so far has been applied or dropped
    ///
    /// Covers closed sessions too: their workers are joined once drained.
    pub async fn flush(&self) {
        let acks: Vec<oneshot::Receiver<()>> = {
            let queues = self.queues();
            queues
                .values()
                .filter_map(|queue| {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    queue.tx.send(Envelope::Flush(ack_tx)).ok().map(|_| ack_rx)
                })
                .collect()
        };
        let retired: Vec<JoinHandle<()>> = self.retired().drain(..).collect();

        for ack in acks {
            let _ = ack.await;
        }
        join_all(retired).await;
    }

    /// Stop accepting work for a session, letting queued jobs finish
    pub fn close_session(&self, session_id: &str) {
        if let Some(queue) = self.queues().remove(session_id) {
            // dropping the sender ends the worker once its queue is empty
            self.retired().push(queue.worker);
        }
    }

    /// Drain every queue and wait for all workers to exit
    pub async fn shutdown(&self) {
        let mut workers: Vec<JoinHandle<()>> = self
            .queues()
            .drain()
            .map(|(_, queue)| queue.worker)
            .collect();
        workers.append(&mut self.retired());

        join_all(workers).await;
    }

    pub fn pending_sessions(&self) -> usize {
        self.queues().len()
    }
}

async fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "persistence worker ended abnormally");
        }
    }
}

async fn run_worker(db: Arc<Database>, session_id: String, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    tracing::trace!(session_id = %session_id, "persistence worker started");

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Job(job) => apply_with_retry(&db, job).await,
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    tracing::trace!(session_id = %session_id, "persistence worker stopped");
}

async fn apply_with_retry(db: &Database, job: PersistJob) {
    let first = match apply(db, &job).await {
        Ok(()) => return,
        Err(e) => e,
    };

    if !first.is_transient() {
        tracing::warn!(
            session_id = job.session_id(),
            job = job.name(),
            error = %first,
            "persistence failed, dropping job"
        );
        return;
    }

    tracing::warn!(
        session_id = job.session_id(),
        job = job.name(),
        error = %first,
        "persistence failed, retrying once"
    );
    tokio::time::sleep(RETRY_DELAY).await;

    if let Err(e) = apply(db, &job).await {
        tracing::warn!(
            session_id = job.session_id(),
            job = job.name(),
            error = %e,
            "persistence failed again, dropping job"
        );
    }
}

async fn apply(db: &Database, job: &PersistJob) -> Result<()> {
    match job {
        PersistJob::OpenCommand {
            session_id,
            seq,
            text,
            directory,
            started_at,
        } => {
            // a retry after a commit we never heard back from
            if db.find_by_seq(session_id, *seq).await?.is_some() {
                return Ok(());
            }

            let semantic_type = classify(text);
            let git_branch = branch_for(directory).await;

            let id = db
                .append(NewCommand {
                    session_id: session_id.clone(),
                    seq: *seq,
                    text: redact(text),
                    directory: directory.clone(),
                    semantic_type,
                    sensitive: is_sensitive(text),
                    complexity: complexity(text),
                    git_branch,
                    start_time: *started_at,
                })
                .await?;

            tracing::debug!(session_id = %session_id, seq, id, %semantic_type, "command opened");
        }

        PersistJob::CloseCommand {
            session_id,
            seq,
            patch,
        } => match db.find_by_seq(session_id, *seq).await? {
            Some(command) => {
                db.update(command.id, *patch).await?;
                tracing::debug!(
                    session_id = %session_id,
                    seq,
                    exit_code = patch.exit_code,
                    duration_ms = patch.duration_ms,
                    "command closed"
                );
            }
            None => {
                tracing::debug!(session_id = %session_id, seq, "close for a command that was never stored");
            }
        },

        PersistJob::OpenErrorWindow {
            session_id,
            problem_seq,
            opened_at,
        } => match db.find_by_seq(session_id, *problem_seq).await? {
            Some(problem) => {
                db.open_error_window(session_id, *problem_seq, &problem.text, *opened_at)
                    .await?;
            }
            None => {
                tracing::debug!(session_id = %session_id, problem_seq, "failing command was never stored");
            }
        },

        PersistJob::SolveErrorWindow {
            session_id,
            problem_seq,
            solution_seq,
            solved_at,
        } => match db.find_by_seq(session_id, *solution_seq).await? {
            Some(solution) => {
                let solved = db
                    .solve_error_window(session_id, *problem_seq, *solution_seq, &solution.text, *solved_at)
                    .await?;
                if solved {
                    tracing::debug!(session_id = %session_id, problem_seq, solution_seq, "error solved");
                }
            }
            None => {
                tracing::debug!(session_id = %session_id, solution_seq, "solving command was never stored");
            }
        },

        PersistJob::SaveSession(record) => db.save_session(record).await?,
    }

    Ok(())
}

// git2 is blocking, keep it off the runtime threads
async fn branch_for(directory: &str) -> Option<String> {
    let directory = directory.to_string();

    match tokio::task::spawn_blocking(move || detect_git_branch(Path::new(&directory))).await {
        Ok(Ok(branch)) => branch,
        Ok(Err(e)) => {
            tracing::trace!(error = %e, "no git branch");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "git branch lookup panicked");
            None
        }
    }
}

/// Current branch of the repository containing `directory`, if any
pub fn detect_git_branch(directory: &Path) -> Result<Option<String>> {
    let repo = match git2::Repository::discover(directory) {
        Ok(repo) => repo,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // fresh repo with no commits yet has an unborn HEAD
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if !head.is_branch() {
        return Ok(None);
    }

    Ok(head.shorthand().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::REDACTED;
    use crate::core::SemanticType;

    fn open(session: &str, seq: i64, text: &str) -> PersistJob {
        PersistJob::OpenCommand {
            session_id: session.to_string(),
            seq,
            text: text.to_string(),
            directory: "/nonexistent/dir".to_string(),
            started_at: Utc::now(),
        }
    }

    fn close(session: &str, seq: i64, exit_code: i32) -> PersistJob {
        PersistJob::CloseCommand {
            session_id: session.to_string(),
            seq,
            patch: CommandPatch {
                exit_code,
                duration_ms: 12,
            },
        }
    }

    async fn dispatcher() -> (PersistenceDispatcher, Arc<Database>) {
        let db = Arc::new(Database::new_test().await.unwrap());
        (PersistenceDispatcher::new(Arc::clone(&db)).unwrap(), db)
    }

    #[tokio::test]
    async fn test_open_then_close_in_order() {
        let (dispatcher, db) = dispatcher().await;

        dispatcher.dispatch(open("s1", 1, "cargo test"));
        dispatcher.dispatch(close("s1", 1, 0));
        dispatcher.flush().await;

        let cmd = db.find_by_seq("s1", 1).await.unwrap().unwrap();
        assert_eq!(cmd.semantic_type, SemanticType::Testing);
        assert_eq!(cmd.exit_code, Some(0));
        assert_eq!(cmd.duration_ms, Some(12));
    }

    #[tokio::test]
    async fn test_sensitive_text_is_redacted() {
        let (dispatcher, db) = dispatcher().await;

        dispatcher.dispatch(open("s1", 1, "export API_KEY=xyz"));
        dispatcher.flush().await;

        let cmd = db.find_by_seq("s1", 1).await.unwrap().unwrap();
        assert!(cmd.sensitive);
        assert_eq!(cmd.text, REDACTED);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (dispatcher, db) = dispatcher().await;

        for seq in 1..=5 {
            dispatcher.dispatch(open("a", seq, "ls"));
            dispatcher.dispatch(open("b", seq, "pwd"));
        }
        dispatcher.flush().await;

        assert_eq!(db.scan(Some("a"), None, 100).await.unwrap().len(), 5);
        assert_eq!(db.scan(Some("b"), None, 100).await.unwrap().len(), 5);
        assert_eq!(dispatcher.pending_sessions(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_open_is_ignored() {
        let (dispatcher, db) = dispatcher().await;

        dispatcher.dispatch(open("s1", 1, "ls"));
        dispatcher.dispatch(open("s1", 1, "ls"));
        dispatcher.flush().await;

        assert_eq!(db.scan(Some("s1"), None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_session_then_shutdown_drains() {
        let (dispatcher, db) = dispatcher().await;

        dispatcher.dispatch(open("s1", 1, "make"));
        dispatcher.close_session("s1");
        dispatcher.dispatch(open("s2", 1, "make"));
        dispatcher.shutdown().await;

        assert!(db.find_by_seq("s1", 1).await.unwrap().is_some());
        assert!(db.find_by_seq("s2", 1).await.unwrap().is_some());
        assert_eq!(dispatcher.pending_sessions(), 0);
    }

    #[tokio::test]
    async fn test_error_window_jobs() {
        let (dispatcher, db) = dispatcher().await;
        let now = Utc::now();

        dispatcher.dispatch(open("s1", 1, "cargo build"));
        dispatcher.dispatch(close("s1", 1, 101));
        dispatcher.dispatch(PersistJob::OpenErrorWindow {
            session_id: "s1".to_string(),
            problem_seq: 1,
            opened_at: now,
        });
        dispatcher.dispatch(open("s1", 2, "cargo update"));
        dispatcher.dispatch(close("s1", 2, 0));
        dispatcher.dispatch(PersistJob::SolveErrorWindow {
            session_id: "s1".to_string(),
            problem_seq: 1,
            solution_seq: 2,
            solved_at: now,
        });
        dispatcher.flush().await;

        let solved = db.get_solutions(10).await.unwrap();
        assert_eq!(solved.len(), 1);
        assert_eq!(solved[0].problem_text, "cargo build");
        assert_eq!(solved[0].solution_text.as_deref(), Some("cargo update"));
    }

    #[tokio::test]
    async fn test_storage_down_drops_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let db = Arc::new(Database::new(&path).await.unwrap());
        let dispatcher = PersistenceDispatcher::new(Arc::clone(&db)).unwrap();

        db.close().await;
        dispatcher.dispatch(open("s1", 1, "make"));
        dispatcher.dispatch(close("s1", 1, 2));

        // retried once, then dropped, never stuck
        tokio::time::timeout(Duration::from_secs(5), dispatcher.flush())
            .await
            .unwrap();
        dispatcher.shutdown().await;

        let reopened = Database::new(&path).await.unwrap();
        assert!(reopened.scan(None, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_waits_for_closed_sessions() {
        let (dispatcher, db) = dispatcher().await;

        for seq in 1..=50 {
            dispatcher.dispatch(open("s1", seq, "ls"));
        }
        dispatcher.close_session("s1");
        dispatcher.flush().await;

        assert_eq!(db.scan(Some("s1"), None, 100).await.unwrap().len(), 50);
    }

    #[test]
    fn test_git_branch_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_git_branch(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_git_branch_unborn_repo() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        assert_eq!(detect_git_branch(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let db = Arc::new(rt.block_on(Database::new_test()).unwrap());

        assert!(matches!(
            PersistenceDispatcher::new(db),
            Err(TrailError::Runtime(_))
        ));
    }
}
