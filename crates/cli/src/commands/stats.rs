use chrono::{Duration, Utc};

use crate::commands::{run_with_workflow, to_data, workflow_failure, CommandResult};

pub fn run(since_days: Option<u32>) -> CommandResult {
    run_with_workflow("stats", |_config, workflow| async move {
        let since = since_days.map(|days| Utc::now() - Duration::days(i64::from(days)));
        let stats =
            workflow.stats(since).await.map_err(|error| workflow_failure(error, "cli-stats"))?;

        let window = match since_days {
            Some(days) => format!("last {days} days"),
            None => "all time".to_string(),
        };
        let message = format!(
            "{} log entries ({} by rules) over {window}",
            stats.total_entries, stats.automated_entries
        );
        Ok((message, to_data(&stats)?))
    })
}
