// Links failures to whatever fixed them
//
// A failing command opens an error window for its session. The next command
// in that session that exits 0 becomes the "solution". It's a heuristic: the
// next success isn't always the real fix, but it usually is close.
//
// Only one window per session. A new failure replaces the open one and the old
// one stays unsolved forever.

use crate::db::{Database, ErrorSolution};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The open window of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorWindow {
    pub failing_seq: i64,
    pub opened_at: DateTime<Utc>,
}

/// What a close event did to the window
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Opened {
        window: ErrorWindow,
        /// Window that was open before, now abandoned
        superseded: Option<ErrorWindow>,
    },
    Solved {
        window: ErrorWindow,
        solution_seq: i64,
        solved_at: DateTime<Utc>,
    },
}

/// Feed one closed command into a session's window slot
pub fn transition(
    window: &mut Option<ErrorWindow>,
    seq: i64,
    exit_code: i32,
    at: DateTime<Utc>,
) -> Option<LinkEvent> {
    if exit_code != 0 {
        let opened = ErrorWindow {
            failing_seq: seq,
            opened_at: at,
        };
        let superseded = window.replace(opened);
        return Some(LinkEvent::Opened {
            window: opened,
            superseded,
        });
    }

    window.take().map(|open| LinkEvent::Solved {
        window: open,
        solution_seq: seq,
        solved_at: at,
    })
}

/// Read side of the (problem, solution) pairs
pub struct ErrorSolutionLinker {
    db: Arc<Database>,
}

impl ErrorSolutionLinker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Newest solved pairs first
    pub async fn solutions(&self, limit: usize) -> Result<Vec<ErrorSolution>> {
        self.db.get_solutions(limit as i64).await
    }

    /// Solved pairs whose failing command contains `fragment`
    pub async fn solutions_for(&self, fragment: &str, limit: usize) -> Result<Vec<ErrorSolution>> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return self.solutions(limit).await;
        }

        self.db.find_solutions(fragment, limit as i64).await
    }

    /// Failures nobody fixed (in the same session, anyway)
    pub async fn unsolved(&self, limit: usize) -> Result<Vec<ErrorSolution>> {
        self.db.get_unsolved(limit as i64).await
    }
}
