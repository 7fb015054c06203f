/// termtrail library
///
/// Captures shell commands, classifies them, links failures to fixes, mines
/// recurring patterns and turns them into runnable workflows.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod intelligence;
pub mod logging;
pub mod shell;
pub mod workflow;

// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::{Result, TrailError};
