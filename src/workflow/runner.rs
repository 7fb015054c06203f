// Runs workflow steps
//
// Each step is handed to `sh -c` exactly as it was stored. The first step that
// exits non-zero stops the run.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;

// What we report when a process died from a signal or never started
pub const NO_EXIT_CODE: i32 = -1;

/// Anything that can execute one literal command line
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion and return its exit code
    async fn run(&self, command: &str) -> Result<i32>;
}

/// Runs commands through `sh -c`, sharing the caller's terminal
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<i32> {
        let status = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;

        Ok(status.code().unwrap_or(NO_EXIT_CODE))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub position: usize,
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub workflow: String,
    /// Only the steps that actually ran
    pub steps: Vec<StepResult>,
    pub overall_success: bool,
    pub times_used: i64,
    pub success_rate: f64,
}

/// Run steps in order until one fails
pub async fn run_steps(runner: &dyn CommandRunner, commands: &[String]) -> Vec<StepResult> {
    let mut steps = Vec::with_capacity(commands.len());

    for (position, command) in commands.iter().enumerate() {
        let started = Instant::now();

        let exit_code = match runner.run(command).await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(position, error = %e, "workflow step could not be started");
                NO_EXIT_CODE
            }
        };

        let step = StepResult {
            position,
            command: command.clone(),
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let failed = !step.succeeded();
        steps.push(step);

        if failed {
            tracing::info!(position, exit_code, "workflow step failed, stopping");
            break;
        }
    }

    steps
}
