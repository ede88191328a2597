use serde_json::json;

use crate::commands::{run_with_workflow, workflow_failure, CommandResult};
use waymark_core::domain::approval::EntityRef;

pub fn run(entity: &str) -> CommandResult {
    let Some(entity) = EntityRef::parse(entity) else {
        return CommandResult::failure(
            "history",
            "invalid_argument",
            format!("expected an entity reference like `trip:42`, got `{entity}`"),
            7,
        );
    };

    run_with_workflow("history", |_config, workflow| async move {
        let correlation_id = format!("cli-history-{entity}");
        let record = workflow
            .record(&entity)
            .await
            .map_err(|error| workflow_failure(error, &correlation_id))?;
        let entries = workflow
            .approval_history(&entity)
            .await
            .map_err(|error| workflow_failure(error, &correlation_id))?;
        let verification = workflow
            .verify_history(&entity)
            .await
            .map_err(|error| workflow_failure(error, &correlation_id))?;

        let message = format!(
            "{entity} is {} with {} log entries (chain {})",
            record.status,
            entries.len(),
            if verification.valid { "intact" } else { "broken" }
        );
        Ok((
            message,
            json!({ "record": record, "entries": entries, "verification": verification }),
        ))
    })
}
