use chrono::Utc;
use serde_json::json;

use crate::commands::{run_with_workflow, workflow_failure, CommandResult};

/// Archives stale rejections. Without `days`, the configured
/// `workflow.auto_archive_rejected_days` applies.
pub fn run(days: Option<u32>) -> CommandResult {
    run_with_workflow("archive-stale", |config, workflow| async move {
        let days = days.unwrap_or(config.workflow.auto_archive_rejected_days);
        let archived = workflow
            .archive_stale_rejections(days, Utc::now())
            .await
            .map_err(|error| workflow_failure(error, "cli-archive-stale"))?;

        let message = if days == 0 {
            "stale rejection archiving is disabled".to_string()
        } else {
            format!("archived {} rejections older than {days} days", archived.len())
        };
        let archived: Vec<String> = archived.iter().map(ToString::to_string).collect();
        Ok((message, json!({ "days": days, "archived": archived })))
    })
}
