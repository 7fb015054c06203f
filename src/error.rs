/// Error types for termtrail
///
/// Validation problems are reported to the caller. Policy rejections and
/// hook-ordering glitches never become errors, they are silent no-ops in
/// the capture pipeline.

use thiserror::Error;

/// Main error type for termtrail operations
#[derive(Error, Debug)]
pub enum TrailError {
    /// Storage unavailable or a query failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O errors (config file, export writer, spawning commands)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Git-related errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Bad workflow name, empty command list and the like
    #[error("Validation error: {0}")]
    Validation(String),

    /// No workflow stored under this name
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A pattern slot could not be turned into a literal command
    #[error("No recorded {semantic_type} command to fill slot {slot}")]
    NoExample { slot: usize, semantic_type: String },

    /// Pattern kind cannot be materialized into a workflow
    #[error("Unsupported pattern: {0}")]
    UnsupportedPattern(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Called outside of a tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for termtrail operations
pub type Result<T> = std::result::Result<T, TrailError>;

/// Convert TrailError to a user-friendly error message
impl TrailError {
    pub fn user_message(&self) -> String {
        match self {
            TrailError::Database(e) => {
                format!("Database error occurred. Please try again. Details: {}", e)
            }
            TrailError::Io(e) => {
                format!("File system error. Check permissions. Details: {}", e)
            }
            TrailError::Git(e) => {
                format!("Git operation failed. Details: {}", e)
            }
            TrailError::Validation(reason) => {
                format!("Invalid input: {}", reason)
            }
            TrailError::WorkflowNotFound(name) => {
                format!("No workflow named '{}'. Run 'termtrail workflow list' to see them.", name)
            }
            TrailError::NoExample { slot, semantic_type } => {
                format!(
                    "Step {} needs a {} command but none has been recorded yet",
                    slot + 1,
                    semantic_type
                )
            }
            TrailError::UnsupportedPattern(msg) => {
                format!("That pattern can't become a workflow: {}", msg)
            }
            TrailError::Config(msg) => {
                format!("Configuration issue: {}", msg)
            }
            TrailError::ConfigParse(e) => {
                format!("Could not read config file: {}", e)
            }
            TrailError::Serialization(e) => {
                format!("Data format error: {}", e)
            }
            TrailError::Csv(e) => {
                format!("CSV export failed: {}", e)
            }
            TrailError::Runtime(msg) => msg.clone(),
        }
    }

    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TrailError::Database(_) | TrailError::Io(_))
    }
}
