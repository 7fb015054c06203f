// Command repository contract
//
// The capture pipeline and the pattern miner only ever talk to command storage
// through these three calls.

use crate::db::{Command, CommandPatch, NewCommand};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait CommandRepository: Send + Sync {
    /// Store a newly opened command, returning its row id
    async fn append(&self, command: NewCommand) -> Result<i64>;

    /// Close a command. Returns false when no row has that id.
    async fn update(&self, id: i64, patch: CommandPatch) -> Result<bool>;

    /// Commands with `id > since_id`, ascending by id, optionally for one session
    ///
    /// Within a session id order equals `seq` order, so callers can page through
    /// history by feeding the last id back in as the cursor.
    async fn scan(
        &self,
        session_id: Option<&str>,
        since_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Command>>;
}
