use crate::commands::{run_with_workflow, to_data, workflow_failure, CommandResult};

/// Pending records of one queue in presentation order, a page at a time.
pub fn run(slug: String, page: Option<usize>) -> CommandResult {
    let page = page.unwrap_or(1);
    if page == 0 {
        return CommandResult::failure("queue", "invalid_argument", "pages are numbered from 1", 7);
    }

    run_with_workflow("queue", |_config, workflow| async move {
        let listing = workflow
            .pending_page(&slug, page)
            .await
            .map_err(|error| workflow_failure(error, &format!("cli-queue-{slug}")))?;

        let message = format!(
            "{slug}: page {} of {} ({} pending)",
            listing.page,
            listing.page_count.max(1),
            listing.total
        );
        Ok((message, to_data(&listing)?))
    })
}
