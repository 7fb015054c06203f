/// Database module for termtrail
///
/// Handles all database operations using SQLite and sqlx.
/// Implements connection pooling for performance.

pub mod connection;
pub mod models;
pub mod patterns;
pub mod queries;
pub mod repository;
pub mod sessions;
pub mod workflows;

pub use connection::Database;
pub use models::*;
pub use queries::{DatabaseStats, TypeStats};
pub use repository::CommandRepository;

use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width UTC text form used for every stored timestamp
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
