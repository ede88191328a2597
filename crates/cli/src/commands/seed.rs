use serde_json::json;

use crate::commands::{run_with_workflow, workflow_failure, CommandResult};
use waymark_db::{DemoSeedDataset, SeedCheck};

pub fn run() -> CommandResult {
    run_with_workflow("seed", |_config, workflow| async move {
        let seeded = DemoSeedDataset::load(&workflow)
            .await
            .map_err(|error| workflow_failure(error, "cli-seed"))?;
        let verification = DemoSeedDataset::verify(&workflow)
            .await
            .map_err(|error| workflow_failure(error, "cli-seed"))?;

        if !verification.all_present {
            return Err(("seed_verification", verification_message(&verification.checks), 6u8));
        }

        let message = format!(
            "demo approval data ready: {} seeded, {} already present",
            seeded.seeded.len(),
            seeded.skipped.len()
        );
        Ok((message, json!({ "seeded": seeded.seeded, "skipped": seeded.skipped })))
    })
}

fn verification_message(checks: &[SeedCheck]) -> String {
    let failed_checks = checks
        .iter()
        .filter(|check| !check.passed)
        .map(|check| format!("{}:{}", check.entity, check.check))
        .collect::<Vec<_>>();

    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
