use chrono::Utc;

use crate::commands::{run_with_workflow, to_data, workflow_failure, CommandResult};
use waymark_core::domain::approval::ActorId;

/// Queue counts, optionally limited to the queues one reviewer can see.
pub fn run(reviewer: Option<String>) -> CommandResult {
    run_with_workflow("dashboard", |_config, workflow| async move {
        let reviewer = reviewer.map(ActorId);
        let summary = workflow
            .dashboard(reviewer.as_ref(), Utc::now())
            .await
            .map_err(|error| workflow_failure(error, "cli-dashboard"))?;

        let message = format!(
            "{} pending across {} queues ({} overdue)",
            summary.total,
            summary.queues.len(),
            summary.overdue
        );
        Ok((message, to_data(&summary)?))
    })
}
