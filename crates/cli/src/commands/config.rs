use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use toml::Value;

use crate::commands::CommandResult;
use waymark_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Serialize)]
struct ConfigField {
    key: &'static str,
    value: String,
    source: String,
}

/// Effective configuration with the source of every value.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let workflow = &config.workflow;

    let entries: [(&'static str, &[&str], String); 12] = [
        ("database.url", &["WAYMARK_DATABASE_URL"], config.database.url.clone()),
        (
            "database.max_connections",
            &["WAYMARK_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            &["WAYMARK_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        (
            "logging.level",
            &["WAYMARK_LOGGING_LEVEL", "WAYMARK_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        (
            "logging.format",
            &["WAYMARK_LOGGING_FORMAT", "WAYMARK_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
        (
            "workflow.require_notes_on_reject",
            &["WAYMARK_WORKFLOW_REQUIRE_NOTES_ON_REJECT"],
            workflow.require_notes_on_reject.to_string(),
        ),
        (
            "workflow.require_notes_on_request_changes",
            &["WAYMARK_WORKFLOW_REQUIRE_NOTES_ON_REQUEST_CHANGES"],
            workflow.require_notes_on_request_changes.to_string(),
        ),
        (
            "workflow.review_sla_hours",
            &["WAYMARK_WORKFLOW_REVIEW_SLA_HOURS"],
            workflow.review_sla_hours.to_string(),
        ),
        (
            "workflow.items_per_page",
            &["WAYMARK_WORKFLOW_ITEMS_PER_PAGE"],
            workflow.items_per_page.to_string(),
        ),
        (
            "workflow.auto_archive_rejected_days",
            &["WAYMARK_WORKFLOW_AUTO_ARCHIVE_REJECTED_DAYS"],
            workflow.auto_archive_rejected_days.to_string(),
        ),
        (
            "workflow.system_actor_id",
            &["WAYMARK_WORKFLOW_SYSTEM_ACTOR_ID"],
            workflow.system_actor_id.clone(),
        ),
        (
            "workflow.catalog_path",
            &["WAYMARK_WORKFLOW_CATALOG_PATH"],
            workflow
                .catalog_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
        ),
    ];

    let fields: Vec<ConfigField> = entries
        .into_iter()
        .map(|(key, env_keys, value)| ConfigField {
            key,
            value,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect();

    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(json!({ "fields": fields })),
    )
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("waymark.toml"), PathBuf::from("config/waymark.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
