// Captures commands from shell hooks
//
// The shell calls us twice per command: once before it runs (open) and once
// after (close). Both return immediately, the actual writes happen in the
// background through the dispatcher.
//
// Some commands never get recorded: destructive ones, and anything typed
// inside directories full of secrets. That's not an error, we just skip them.

use crate::core::dispatcher::{PersistJob, PersistenceDispatcher};
use crate::core::session::{Session, SessionTracker};
use crate::db::{CommandPatch, Database};
use crate::error::Result;
use crate::intelligence::error_linker::{transition, LinkEvent};
use crate::shell::Shell;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

// Don't let anyone record a 10MB command. that's just weird.
pub const MAX_COMMAND_LENGTH: usize = 10_000;

// Stuff we refuse to remember, let alone suggest again later
const DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"^(sudo\s+)?rm\s+(-[a-z]*r[a-z]*f[a-z]*|-[a-z]*f[a-z]*r[a-z]*|-r\s+-f|-f\s+-r)\s+(/|/\*|~|~/|~/\*|\*)(\s|$)",
    r"^(sudo\s+)?rm\s+--recursive\s+--force\s+(/|~|\*)(\s|$)",
    r"(^|[\s;&|])mkfs(\.\w+)?(\s|$)",
    r"(^|[\s;&|])dd\s+if=",
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    r"(^|[\s;&|])shred(\s|$)",
    r">\s*/dev/sd[a-z]",
    r"^(sudo\s+)?chmod\s+-r\s+777\s+/(\s|$)",
];

const SENSITIVE_DIRECTORIES: &[&str] = &[
    "~/.ssh",
    "~/.gnupg",
    "~/.aws",
    "~/.password-store",
    "~/.kube",
    "/etc/ssl/private",
];

/// Why a command was not captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blank,
    TooLong,
    Destructive,
    Ignored,
    SensitiveDirectory,
}

/// What gets captured and what doesn't
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    destructive: Vec<Regex>,
    ignored_prefixes: Vec<String>,
    sensitive_dirs: Vec<PathBuf>,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturePolicy {
    /// Built-in denylists only
    pub fn new() -> Self {
        // Build all the regex patterns once so we don't recompile them every time
        let destructive = DESTRUCTIVE_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();

        let sensitive_dirs = SENSITIVE_DIRECTORIES
            .iter()
            .filter_map(|dir| expand_home(dir))
            .collect();

        Self {
            destructive,
            ignored_prefixes: Vec::new(),
            sensitive_dirs,
        }
    }

    /// Extra command prefixes to skip
    pub fn with_ignored_commands(mut self, prefixes: &[String]) -> Self {
        self.ignored_prefixes.extend(
            prefixes
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty()),
        );
        self
    }

    /// Extra directories to never record in (`~` is expanded)
    pub fn with_sensitive_directories(mut self, dirs: &[String]) -> Self {
        self.sensitive_dirs
            .extend(dirs.iter().filter_map(|d| expand_home(d.trim())));
        self
    }

    /// `None` means the command may be captured
    pub fn check(&self, text: &str, directory: &str) -> Option<Rejection> {
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Some(Rejection::Blank);
        }

        // Nobody needs a 10KB command
        if trimmed.len() > MAX_COMMAND_LENGTH {
            return Some(Rejection::TooLong);
        }

        let lowercase = trimmed.to_lowercase();
        if self.destructive.iter().any(|re| re.is_match(&lowercase)) {
            return Some(Rejection::Destructive);
        }

        if self.ignored_prefixes.iter().any(|prefix| {
            lowercase == *prefix
                || lowercase
                    .strip_prefix(prefix.as_str())
                    .map(|rest| rest.starts_with(char::is_whitespace))
                    .unwrap_or(false)
        }) {
            return Some(Rejection::Ignored);
        }

        if self.in_sensitive_directory(directory) {
            return Some(Rejection::SensitiveDirectory);
        }

        None
    }

    fn in_sensitive_directory(&self, directory: &str) -> bool {
        let Some(dir) = expand_home(directory.trim()) else {
            return false;
        };
        self.sensitive_dirs.iter().any(|sensitive| dir.starts_with(sensitive))
    }
}

fn expand_home(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }

    if path == "~" {
        return dirs::home_dir();
    }

    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

/// Remove null bytes and surrounding whitespace, keep everything else
pub fn normalize(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Handle for a captured command, given back to the hook at start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRef {
    pub session_id: String,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOutcome {
    pub accepted: bool,
    pub command: Option<CommandRef>,
}

impl StartOutcome {
    fn rejected() -> Self {
        Self {
            accepted: false,
            command: None,
        }
    }
}

/// What a successful close did
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedCommand {
    pub session_id: String,
    pub seq: i64,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub link: Option<LinkEvent>,
}

pub struct CapturePipeline {
    db: Arc<Database>,
    sessions: SessionTracker,
    dispatcher: PersistenceDispatcher,
    policy: CapturePolicy,
}

impl CapturePipeline {
    /// Needs a running tokio runtime for the background writers
    pub fn new(db: Arc<Database>, policy: CapturePolicy) -> Result<Self> {
        let dispatcher = PersistenceDispatcher::new(Arc::clone(&db))?;

        Ok(Self {
            db,
            sessions: SessionTracker::new(),
            dispatcher,
            policy,
        })
    }

    /// Start a new session and return its id
    pub fn attach(&self, shell: Shell) -> String {
        let session = self.sessions.attach(shell);
        self.dispatcher.dispatch(PersistJob::SaveSession(session.snapshot()));

        tracing::info!(session_id = %session.id, shell = %shell, "session attached");
        session.id
    }

    /// Start (or keep) a session under a caller-chosen id
    ///
    /// `None` if that id has already ended.
    pub fn attach_with_id(&self, id: &str, shell: Shell) -> Option<Session> {
        let session = self.sessions.attach_with_id(id, shell)?;
        self.dispatcher.dispatch(PersistJob::SaveSession(session.snapshot()));
        Some(session)
    }

    /// End a session
    ///
    /// A command still pending stays open in storage and an open error window
    /// stays unsolved. Returns false if there was no active session.
    pub fn detach(&self, id: &str) -> bool {
        match self.sessions.detach(id) {
            Some(session) => {
                self.dispatcher.dispatch(PersistJob::SaveSession(session.snapshot()));
                self.dispatcher.close_session(id);
                tracing::info!(session_id = %id, "session detached");
                true
            }
            None => false,
        }
    }

    /// Load a session written by an earlier process
    ///
    /// Short-lived hook processes call this before `open`/`close` so they
    /// continue the same state instead of starting over. `None` for unknown
    /// and ended sessions; events for an ended one are ignored either way.
    pub async fn resume(&self, id: &str) -> Result<Option<Session>> {
        if let Some(session) = self.sessions.get(id) {
            return Ok(Some(session));
        }
        if self.sessions.is_ended(id) {
            return Ok(None);
        }

        let Some(record) = self.db.load_session(id).await? else {
            return Ok(None);
        };
        let session = self.sessions.insert(Session::from_record(record));
        Ok(session.is_active().then_some(session))
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id)
    }

    /// Pre-execution event
    ///
    /// Returns the session-scoped ordering key of the new command, or `None`
    /// when the command is skipped.
    pub fn open(&self, text: &str, directory: &str, session_id: &str) -> Option<i64> {
        if let Some(reason) = self.policy.check(text, directory) {
            tracing::debug!(session_id = %session_id, ?reason, "command not captured");
            return None;
        }

        let text = normalize(text);
        let started_at = Utc::now();

        let opened = self.sessions.with_session(session_id, Shell::Unknown, |session| {
            if let Some(stale) = session.pending_seq {
                // hooks always close before the next open
                debug_assert!(false, "open while seq {} is still pending", stale);
                tracing::error!(session_id = %session_id, stale, "open while a command is pending");
            }

            let seq = session.next_seq;
            session.next_seq += 1;
            session.pending_seq = Some(seq);
            (seq, session.snapshot())
        });

        let Some((seq, snapshot)) = opened else {
            tracing::debug!(session_id = %session_id, "open on ended session ignored");
            return None;
        };

        self.dispatcher.dispatch(PersistJob::OpenCommand {
            session_id: session_id.to_string(),
            seq,
            text,
            directory: directory.to_string(),
            started_at,
        });
        self.dispatcher.dispatch(PersistJob::SaveSession(snapshot));

        Some(seq)
    }

    /// Post-execution event for the session's pending command
    ///
    /// With nothing pending this is a silent no-op.
    pub fn close(&self, session_id: &str, exit_code: i32, duration_ms: u64) -> Option<ClosedCommand> {
        self.close_matching(session_id, None, exit_code, duration_ms, Utc::now())
    }

    fn close_matching(
        &self,
        session_id: &str,
        expected_seq: Option<i64>,
        exit_code: i32,
        duration_ms: u64,
        at: DateTime<Utc>,
    ) -> Option<ClosedCommand> {
        let closed = self
            .sessions
            .with_existing(session_id, |session| {
                let seq = session.pending_seq?;
                if expected_seq.is_some_and(|expected| expected != seq) {
                    return None;
                }
                session.pending_seq = None;

                let link = transition(&mut session.error_window, seq, exit_code, at);
                Some((seq, link, session.snapshot()))
            })
            .flatten();

        let Some((seq, link, snapshot)) = closed else {
            tracing::debug!(session_id = %session_id, exit_code, "close without a pending command");
            return None;
        };

        self.dispatcher.dispatch(PersistJob::CloseCommand {
            session_id: session_id.to_string(),
            seq,
            patch: CommandPatch {
                exit_code,
                duration_ms,
            },
        });

        match &link {
            Some(LinkEvent::Opened { window, superseded }) => {
                if let Some(old) = superseded {
                    tracing::debug!(session_id = %session_id, abandoned = old.failing_seq, "error window superseded");
                }
                self.dispatcher.dispatch(PersistJob::OpenErrorWindow {
                    session_id: session_id.to_string(),
                    problem_seq: window.failing_seq,
                    opened_at: window.opened_at,
                });
            }
            Some(LinkEvent::Solved {
                window,
                solution_seq,
                solved_at,
            }) => {
                self.dispatcher.dispatch(PersistJob::SolveErrorWindow {
                    session_id: session_id.to_string(),
                    problem_seq: window.failing_seq,
                    solution_seq: *solution_seq,
                    solved_at: *solved_at,
                });
            }
            None => {}
        }

        self.dispatcher.dispatch(PersistJob::SaveSession(snapshot));

        Some(ClosedCommand {
            session_id: session_id.to_string(),
            seq,
            exit_code,
            duration_ms,
            link,
        })
    }

    /// Hook boundary: command about to run
    pub fn on_command_start(&self, text: &str, cwd: &str, session_id: &str) -> StartOutcome {
        match self.open(text, cwd, session_id) {
            Some(seq) => StartOutcome {
                accepted: true,
                command: Some(CommandRef {
                    session_id: session_id.to_string(),
                    seq,
                }),
            },
            None => StartOutcome::rejected(),
        }
    }

    /// Hook boundary: command finished
    ///
    /// A ref that doesn't match the session's pending command is ignored.
    pub fn on_command_end(&self, command: &CommandRef, exit_code: i32, duration_ms: u64) {
        self.close_matching(
            &command.session_id,
            Some(command.seq),
            exit_code,
            duration_ms,
            Utc::now(),
        );
    }

    /// Wait for queued writes to land
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    /// Flush everything and stop the background writers
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
