/// Session tracking
///
/// Every shell that attaches gets a session. The per-session capture state
/// (next ordering key, pending command, open error window) lives on the
/// session itself, so two terminals never see each other's state.

use crate::db::SessionRecord;
use crate::intelligence::error_linker::ErrorWindow;
use crate::shell::Shell;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SessionStatus {
    fn from(s: &str) -> Self {
        if s == "ended" {
            SessionStatus::Ended
        } else {
            SessionStatus::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub shell: Shell,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Ordering key the next opened command will get
    pub next_seq: i64,
    /// Command opened but not closed yet
    pub pending_seq: Option<i64>,
    pub error_window: Option<ErrorWindow>,
}

impl Session {
    pub fn new(id: impl Into<String>, shell: Shell) -> Self {
        Self {
            id: id.into(),
            shell,
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            next_seq: 1,
            pending_seq: None,
            error_window: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Row written to the `sessions` table
    pub fn snapshot(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            shell: self.shell.name().to_string(),
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status.as_str().to_string(),
            next_seq: self.next_seq,
            pending_seq: self.pending_seq,
            window_problem_seq: self.error_window.map(|w| w.failing_seq),
            window_opened_at: self.error_window.map(|w| w.opened_at),
        }
    }

    pub fn from_record(record: SessionRecord) -> Self {
        let error_window = match (record.window_problem_seq, record.window_opened_at) {
            (Some(failing_seq), Some(opened_at)) => Some(ErrorWindow {
                failing_seq,
                opened_at,
            }),
            _ => None,
        };

        Self {
            shell: Shell::from(record.shell.as_str()),
            status: SessionStatus::from(record.status.as_str()),
            id: record.id,
            start_time: record.start_time,
            end_time: record.end_time,
            next_seq: record.next_seq,
            pending_seq: record.pending_seq,
            error_window,
        }
    }
}

/// In-memory table of live sessions keyed by id
///
/// Ended sessions are dropped from the table. Only their id is kept, so
/// late events for them stay no-ops instead of starting a fresh session.
#[derive(Default)]
pub struct SessionTracker {
    inner: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    active: HashMap<String, Session>,
    ended: HashSet<String>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves plain data behind, still usable
    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a session with a fresh id
    pub fn attach(&self, shell: Shell) -> Session {
        let session = Session::new(Uuid::new_v4().to_string(), shell);
        self.lock().active.insert(session.id.clone(), session.clone());
        session
    }

    /// Start a session under an id chosen by the caller
    ///
    /// An id that is already tracked keeps its existing session. Returns
    /// `None` if that id has already ended.
    pub fn attach_with_id(&self, id: &str, shell: Shell) -> Option<Session> {
        let mut sessions = self.lock();
        if sessions.ended.contains(id) {
            return None;
        }

        let session = sessions
            .active
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, shell))
            .clone();
        Some(session)
    }

    /// End a session
    ///
    /// Drops the pending slot and abandons any open error window. Returns
    /// `None` if the session is unknown or already ended.
    pub fn detach(&self, id: &str) -> Option<Session> {
        let mut sessions = self.lock();
        let mut session = sessions.active.remove(id)?;
        sessions.ended.insert(session.id.clone());

        session.status = SessionStatus::Ended;
        session.end_time = Some(Utc::now());
        session.pending_seq = None;
        session.error_window = None;

        Some(session)
    }

    /// A live session
    pub fn get(&self, id: &str) -> Option<Session> {
        self.lock().active.get(id).cloned()
    }

    pub fn is_ended(&self, id: &str) -> bool {
        self.lock().ended.contains(id)
    }

    /// Track a session loaded from storage, unless one is already tracked
    ///
    /// An ended session is only remembered as ended.
    pub fn insert(&self, session: Session) -> Session {
        let mut sessions = self.lock();
        if !session.is_active() {
            sessions.ended.insert(session.id.clone());
            return session;
        }

        sessions
            .active
            .entry(session.id.clone())
            .or_insert(session)
            .clone()
    }

    /// Mutate a live session under the lock, creating it if unknown
    ///
    /// `None` if the id belongs to an ended session.
    pub fn with_session<R>(
        &self,
        id: &str,
        shell_if_new: Shell,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut sessions = self.lock();
        if sessions.ended.contains(id) {
            return None;
        }

        let session = sessions
            .active
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, shell_if_new));
        Some(f(session))
    }

    /// Mutate a live session under the lock, if it is tracked
    pub fn with_existing<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.lock().active.get_mut(id).map(f)
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}
