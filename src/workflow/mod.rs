/// Workflows
///
/// A workflow is a named, ordered list of literal shell commands plus how
/// often it has been run and how often that went well.

pub mod manager;
pub mod runner;

pub use manager::WorkflowManager;
pub use runner::{CommandRunner, RunReport, ShellRunner, StepResult};

use crate::db::WorkflowRow;
use crate::error::{Result, TrailError};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NAME_REGEX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").ok());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    /// One literal command per step, run in this order
    pub commands: Vec<String>,
    pub times_used: i64,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Build a validated, never-run workflow
    pub fn new(name: &str, description: &str, commands: Vec<String>) -> Result<Self> {
        validate_name(name)?;
        validate_commands(&commands)?;

        let now = Utc::now();
        Ok(Self {
            name: name.to_string(),
            description: description.trim().to_string(),
            commands,
            times_used: 0,
            success_rate: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    pub(crate) fn from_row(row: WorkflowRow, commands: Vec<String>) -> Self {
        Self {
            name: row.name,
            description: row.description,
            commands,
            times_used: row.times_used,
            success_rate: row.success_rate,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub fn is_valid_name(name: &str) -> bool {
    NAME_REGEX
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(TrailError::Validation(format!(
            "invalid workflow name '{}': use 1-50 letters, digits, '-' or '_'",
            name
        )))
    }
}

pub fn validate_commands(commands: &[String]) -> Result<()> {
    if commands.is_empty() {
        return Err(TrailError::Validation(
            "a workflow needs at least one command".to_string(),
        ));
    }

    if let Some(position) = commands.iter().position(|c| c.trim().is_empty()) {
        return Err(TrailError::Validation(format!(
            "workflow command {} is blank",
            position + 1
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("deploy-prod_v2"));
        assert!(is_valid_name(&"a".repeat(50)));
        assert!(!is_valid_name("bad name!"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"a".repeat(51)));
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(matches!(
            Workflow::new("bad name!", "", vec!["ls".to_string()]),
            Err(TrailError::Validation(_))
        ));
        assert!(matches!(
            Workflow::new("ok", "", vec![]),
            Err(TrailError::Validation(_))
        ));
        assert!(matches!(
            Workflow::new("ok", "", vec!["ls".to_string(), "  ".to_string()]),
            Err(TrailError::Validation(_))
        ));
    }

    #[test]
    fn test_new_keeps_commands_literal() {
        let commands = vec!["  echo 'a  b'  ".to_string()];
        let workflow = Workflow::new("echo", " says things ", commands.clone()).unwrap();

        assert_eq!(workflow.commands, commands);
        assert_eq!(workflow.description, "says things");
        assert_eq!(workflow.times_used, 0);
        assert_eq!(workflow.success_rate, 0.0);
    }
}
