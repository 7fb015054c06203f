/// Workflow storage
///
/// A workflow is a header row plus one `workflow_commands` row per step.
/// Command text is stored exactly as given and never packed into one column.

use crate::db::{timestamp, Database, WorkflowRow};
use crate::error::Result;
use crate::workflow::Workflow;
use chrono::{DateTime, Utc};

impl Database {
    /// Insert or replace a workflow and all of its steps
    ///
    /// Replacing resets the usage statistics.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (name, description, times_used, success_rate, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                times_used = excluded.times_used,
                success_rate = excluded.success_rate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.times_used)
        .bind(workflow.success_rate)
        .bind(timestamp(&workflow.created_at))
        .bind(timestamp(&workflow.updated_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM workflow_commands WHERE workflow_name = ?")
            .bind(&workflow.name)
            .execute(&mut *tx)
            .await?;

        for (position, text) in workflow.commands.iter().enumerate() {
            sqlx::query("INSERT INTO workflow_commands (workflow_name, position, text) VALUES (?, ?, ?)")
                .bind(&workflow.name)
                .bind(position as i64)
                .bind(text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    pub async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => {
                let commands = self.get_workflow_commands(&row.name).await?;
                Ok(Some(Workflow::from_row(row, commands)))
            }
            None => Ok(None),
        }
    }

    /// All workflows ordered by name
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows ORDER BY name ASC")
            .fetch_all(self.pool())
            .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let commands = self.get_workflow_commands(&row.name).await?;
            workflows.push(Workflow::from_row(row, commands));
        }

        Ok(workflows)
    }

    /// Returns false if no workflow had that name
    pub async fn delete_workflow(&self, name: &str) -> Result<bool> {
        // steps go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM workflows WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fold one completed run into the statistics
    ///
    /// Counter and rate move together in a single statement. Returns the new
    /// `(times_used, success_rate)`, or `None` if the workflow is gone.
    pub async fn record_workflow_run(
        &self,
        name: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<Option<(i64, f64)>> {
        let outcome = if success { 1.0_f64 } else { 0.0_f64 };

        let row: Option<(i64, f64)> = sqlx::query_as(
            r#"
            UPDATE workflows
            SET times_used = times_used + 1,
                success_rate = (success_rate * times_used + ?) / (times_used + 1),
                updated_at = ?
            WHERE name = ?
            RETURNING times_used, success_rate
            "#,
        )
        .bind(outcome)
        .bind(timestamp(&at))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    async fn get_workflow_commands(&self, name: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT text FROM workflow_commands WHERE workflow_name = ? ORDER BY position ASC",
        )
        .bind(name)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(text,)| text).collect())
    }
}
