pub mod archive_stale;
pub mod config;
pub mod dashboard;
pub mod history;
pub mod migrate;
pub mod queue;
pub mod seed;
pub mod stats;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

use waymark_core::catalog::WorkflowCatalog;
use waymark_core::config::{AppConfig, LoadOptions};
use waymark_core::errors::ApplicationError;
use waymark_db::{
    connect_with_config, migrations, ApprovalWorkflow, DbPool, SqlApprovalRepository,
};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, (error_class, message, exit_code): Failure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Error class, message and process exit code of a failed command.
pub(crate) type Failure = (&'static str, String, u8);

/// Config and a current-thread runtime, or the failure to report.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        let message = format!("configuration issue: {error}");
        CommandResult::failure(command, "config_validation", message, 2)
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    Ok((config, runtime))
}

/// Runs `body` against a migrated database and reports its JSON payload.
pub(crate) fn run_with_workflow<F, Fut>(command: &str, body: F) -> CommandResult
where
    F: FnOnce(AppConfig, ApprovalWorkflow<SqlApprovalRepository>) -> Fut,
    Fut: std::future::Future<Output = Result<(String, Value), Failure>>,
{
    let (config, runtime) = match prepare(command) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let catalog = load_catalog(&config).map_err(|error| {
            let error_class = error
                .downcast_ref::<ApplicationError>()
                .map_or("catalog", ApplicationError::error_class);
            (error_class, format!("{error:#}"), 2u8)
        })?;
        let pool = open_pool(&config).await?;
        let repository = SqlApprovalRepository::new(pool.clone());
        let workflow = ApprovalWorkflow::new(repository, catalog, &config.workflow);

        let outcome = body(config, workflow).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok((message, data)) => CommandResult::success_with_data(command, message, Some(data)),
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

fn load_catalog(config: &AppConfig) -> anyhow::Result<WorkflowCatalog> {
    let Some(path) = config.workflow.catalog_path.as_deref() else {
        return Ok(WorkflowCatalog::default());
    };
    WorkflowCatalog::load(path)
        .map_err(ApplicationError::from)
        .with_context(|| format!("loading workflow catalog `{}`", path.display()))
}

/// Maps a workflow failure onto its stable class and exit code.
pub(crate) fn workflow_failure(error: ApplicationError, correlation_id: &str) -> Failure {
    let error_class = error.error_class();
    let exit_code = match &error {
        ApplicationError::NotFound(_) => 8,
        ApplicationError::Persistence(_) => 4,
        ApplicationError::Configuration(_) => 2,
        _ => 7,
    };
    let interface = error.into_interface(correlation_id);
    (error_class, format!("{} ({interface})", interface.user_message()), exit_code)
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|error| ("serialization", error.to_string(), 9u8))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};
    use waymark_core::config::AppConfig;
    use waymark_core::domain::approval::EntityRef;
    use waymark_core::errors::ApplicationError;

    use super::{load_catalog, workflow_failure, CommandResult};

    #[test]
    fn success_payload_carries_data() {
        let result =
            CommandResult::success_with_data("stats", "ok", Some(json!({ "total_entries": 3 })));
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["total_entries"], 3);
    }

    #[test]
    fn failure_payload_omits_data() {
        let result = CommandResult::failure("history", "not_found", "missing", 8);
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(payload["error_class"], "not_found");
        assert!(payload.get("data").is_none());
    }

    #[test]
    fn not_found_maps_to_its_own_exit_code() {
        let (class, message, code) = workflow_failure(
            ApplicationError::NotFound(EntityRef::new("trip", "9").to_string()),
            "cli-history",
        );

        assert_eq!(class, "not_found");
        assert_eq!(code, 8);
        assert!(message.starts_with("The requested item does not exist."));
    }

    #[test]
    fn unreadable_catalogs_are_configuration_failures() {
        let mut config = AppConfig::default();
        config.workflow.catalog_path = Some(PathBuf::from("/nonexistent/waymark-catalog.toml"));

        let error = load_catalog(&config).expect_err("missing catalog");
        let error_class =
            error.downcast_ref::<ApplicationError>().map(ApplicationError::error_class);
        assert_eq!(error_class, Some("configuration"));
        assert!(format!("{error:#}").starts_with("loading workflow catalog"));
    }
}
