use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::engine::EngineSettings;

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["waymark.toml", "config/waymark.toml"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Behavior knobs for the approval workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowConfig {
    pub require_notes_on_reject: bool,
    pub require_notes_on_request_changes: bool,
    pub review_sla_hours: u32,
    pub items_per_page: u32,
    /// `0` disables stale rejection archiving.
    pub auto_archive_rejected_days: u32,
    pub system_actor_id: String,
    pub catalog_path: Option<PathBuf>,
}

impl WorkflowConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            require_notes_on_reject: self.require_notes_on_reject,
            require_notes_on_request_changes: self.require_notes_on_request_changes,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "logging.format `{other}` is not one of compact|pretty|json"
            ))),
        }
    }
}

/// Programmatic values that win over every other source.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub catalog_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` is required but does not exist")]
    MissingConfigFile(PathBuf),
    #[error("`${{{var}}}` is referenced in a config file but not set")]
    MissingEnvInterpolation { var: String },
    #[error("a `${{` interpolation is missing its closing brace")]
    UnterminatedInterpolation,
    #[error("environment variable `{key}` has an unusable value `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Where `WAYMARK_*` variables and `${VAR}` references are resolved.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://waymark.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            workflow: WorkflowConfig {
                require_notes_on_reject: true,
                require_notes_on_request_changes: true,
                review_sla_hours: 48,
                items_per_page: 25,
                auto_archive_rejected_days: 30,
                system_actor_id: "system:approval-rules".to_string(),
                catalog_path: None,
            },
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        Self::load_from(options, &ProcessEnv)
    }

    /// Layers defaults, the config file, `WAYMARK_*` variables and explicit
    /// overrides, in that order, then validates the result.
    pub fn load_from(options: LoadOptions, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match locate_config_file(options.config_path.as_deref()) {
            Some(path) => config.merge(read_toml_with(&path, env)?),
            None if options.require_file => {
                let expected = options
                    .config_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        config.merge(ConfigPatch::from_env(env)?);
        config.merge(options.overrides.into_patch());
        config.validate()?;

        Ok(config)
    }

    fn merge(&mut self, patch: ConfigPatch) {
        let database = patch.database.unwrap_or_default();
        replace(&mut self.database.url, database.url);
        replace(&mut self.database.max_connections, database.max_connections);
        replace(&mut self.database.timeout_secs, database.timeout_secs);

        let logging = patch.logging.unwrap_or_default();
        replace(&mut self.logging.level, logging.level);
        replace(&mut self.logging.format, logging.format);

        let workflow = patch.workflow.unwrap_or_default();
        let current = &mut self.workflow;
        replace(&mut current.require_notes_on_reject, workflow.require_notes_on_reject);
        replace(
            &mut current.require_notes_on_request_changes,
            workflow.require_notes_on_request_changes,
        );
        replace(&mut current.review_sla_hours, workflow.review_sla_hours);
        replace(&mut current.items_per_page, workflow.items_per_page);
        replace(&mut current.auto_archive_rejected_days, workflow.auto_archive_rejected_days);
        replace(&mut current.system_actor_id, workflow.system_actor_id);
        if workflow.catalog_path.is_some() {
            current.catalog_path = workflow.catalog_path;
        }
    }

    /// Reports every problem at once rather than the first one found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let url = self.database.url.trim();
        if !(url.starts_with("sqlite:") || url == ":memory:") {
            problems.push("database.url must be a sqlite URL (`sqlite://path`, `sqlite::memory:`)");
        }
        if self.database.max_connections == 0 {
            problems.push("database.max_connections must be at least 1");
        }
        if !(1..=300).contains(&self.database.timeout_secs) {
            problems.push("database.timeout_secs must be between 1 and 300");
        }

        if !matches!(
            self.logging.level.trim().to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            problems.push("logging.level must be one of trace|debug|info|warn|error");
        }

        if self.workflow.review_sla_hours == 0 {
            problems.push("workflow.review_sla_hours must be at least 1");
        }
        if !(1..=500).contains(&self.workflow.items_per_page) {
            problems.push("workflow.items_per_page must be between 1 and 500");
        }
        if self.workflow.system_actor_id.trim().is_empty() {
            problems.push("workflow.system_actor_id must not be blank");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems.join("; ")))
        }
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn locate_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

/// Reads a TOML file, resolving `${VAR}` references from the process
/// environment first.
pub(crate) fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    read_toml_with(path, &ProcessEnv)
}

fn read_toml_with<T: serde::de::DeserializeOwned>(
    path: &Path,
    env: &dyn EnvSource,
) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str(&interpolate(&raw, env)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` and `${VAR:-fallback}`.
fn interpolate(input: &str, env: &dyn EnvSource) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let expression_start = &rest[start + 2..];
        let end = expression_start.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let expression = &expression_start[..end];

        let (name, fallback) = match expression.split_once(":-") {
            Some((name, fallback)) => (name.trim(), Some(fallback)),
            None => (expression.trim(), None),
        };
        let value = env
            .var(name)
            .or_else(|| fallback.map(str::to_string))
            .ok_or_else(|| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;

        output.push_str(&value);
        rest = &expression_start[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    workflow: Option<WorkflowPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    require_notes_on_reject: Option<bool>,
    require_notes_on_request_changes: Option<bool>,
    review_sla_hours: Option<u32>,
    items_per_page: Option<u32>,
    auto_archive_rejected_days: Option<u32>,
    system_actor_id: Option<String>,
    catalog_path: Option<PathBuf>,
}

impl ConfigPatch {
    /// `WAYMARK_<SECTION>_<FIELD>`; logging also accepts `WAYMARK_LOG_*`.
    /// Blank values are ignored.
    fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            database: Some(DatabasePatch {
                url: env_text(env, &["WAYMARK_DATABASE_URL"]),
                max_connections: env_parsed(env, &["WAYMARK_DATABASE_MAX_CONNECTIONS"])?,
                timeout_secs: env_parsed(env, &["WAYMARK_DATABASE_TIMEOUT_SECS"])?,
            }),
            logging: Some(LoggingPatch {
                level: env_text(env, &["WAYMARK_LOGGING_LEVEL", "WAYMARK_LOG_LEVEL"]),
                format: env_parsed(env, &["WAYMARK_LOGGING_FORMAT", "WAYMARK_LOG_FORMAT"])?,
            }),
            workflow: Some(WorkflowPatch {
                require_notes_on_reject: env_parsed(
                    env,
                    &["WAYMARK_WORKFLOW_REQUIRE_NOTES_ON_REJECT"],
                )?,
                require_notes_on_request_changes: env_parsed(
                    env,
                    &["WAYMARK_WORKFLOW_REQUIRE_NOTES_ON_REQUEST_CHANGES"],
                )?,
                review_sla_hours: env_parsed(env, &["WAYMARK_WORKFLOW_REVIEW_SLA_HOURS"])?,
                items_per_page: env_parsed(env, &["WAYMARK_WORKFLOW_ITEMS_PER_PAGE"])?,
                auto_archive_rejected_days: env_parsed(
                    env,
                    &["WAYMARK_WORKFLOW_AUTO_ARCHIVE_REJECTED_DAYS"],
                )?,
                system_actor_id: env_text(env, &["WAYMARK_WORKFLOW_SYSTEM_ACTOR_ID"]),
                catalog_path: env_text(env, &["WAYMARK_WORKFLOW_CATALOG_PATH"])
                    .map(PathBuf::from),
            }),
        })
    }
}

impl ConfigOverrides {
    fn into_patch(self) -> ConfigPatch {
        ConfigPatch {
            database: Some(DatabasePatch { url: self.database_url, ..DatabasePatch::default() }),
            logging: Some(LoggingPatch { level: self.log_level, format: self.log_format }),
            workflow: Some(WorkflowPatch {
                catalog_path: self.catalog_path,
                ..WorkflowPatch::default()
            }),
        }
    }
}

/// First non-blank value among `keys`, with the key it came from.
fn env_lookup(env: &dyn EnvSource, keys: &[&str]) -> Option<(String, String)> {
    keys.iter().find_map(|key| {
        env.var(key).filter(|value| !value.trim().is_empty()).map(|value| (key.to_string(), value))
    })
}

fn env_text(env: &dyn EnvSource, keys: &[&str]) -> Option<String> {
    env_lookup(env, keys).map(|(_, value)| value)
}

fn env_parsed<T: FromStr>(env: &dyn EnvSource, keys: &[&str]) -> Result<Option<T>, ConfigError> {
    env_lookup(env, keys)
        .map(|(key, value)| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride { key, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("waymark.toml");
        fs::write(&path, body).expect("write config");
        path
    }

    fn from_file(path: PathBuf) -> LoadOptions {
        LoadOptions { config_path: Some(path), ..LoadOptions::default() }
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().expect("defaults validate");

        assert!(config.workflow.require_notes_on_reject);
        assert_eq!(config.workflow.review_sla_hours, 48);
        assert_eq!(config.workflow.auto_archive_rejected_days, 30);
        assert_eq!(config.workflow.system_actor_id, "system:approval-rules");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_values_interpolate_environment_references() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
[database]
url = "sqlite://${WAYMARK_TEST_DB}"

[workflow]
review_sla_hours = 12
require_notes_on_request_changes = false
system_actor_id = "${WAYMARK_TEST_ACTOR:-system:fallback}"
"#,
        );

        let config = AppConfig::load_from(from_file(path), &env(&[("WAYMARK_TEST_DB", "trips.db")]))
            .expect("load");

        assert_eq!(config.database.url, "sqlite://trips.db");
        assert_eq!(config.workflow.review_sla_hours, 12);
        assert!(!config.workflow.require_notes_on_request_changes);
        assert_eq!(config.workflow.system_actor_id, "system:fallback");
    }

    #[test]
    fn unresolved_references_are_errors() {
        let dir = TempDir::new().expect("tempdir");
        let missing = write_config(&dir, "[database]\nurl = \"sqlite://${NOPE}\"\n");
        let error = AppConfig::load_from(from_file(missing), &env(&[])).expect_err("missing var");
        assert!(matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "NOPE"));

        let open = write_config(&dir, "[database]\nurl = \"sqlite://${NOPE\"\n");
        let error = AppConfig::load_from(from_file(open), &env(&[])).expect_err("unterminated");
        assert!(matches!(error, ConfigError::UnterminatedInterpolation));
    }

    #[test]
    fn logging_accepts_short_aliases_but_prefers_full_names() {
        let aliases = env(&[("WAYMARK_LOG_LEVEL", "warn"), ("WAYMARK_LOG_FORMAT", "pretty")]);
        let config = AppConfig::load_from(LoadOptions::default(), &aliases).expect("load");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);

        let both = env(&[("WAYMARK_LOGGING_LEVEL", "error"), ("WAYMARK_LOG_LEVEL", "warn")]);
        let config = AppConfig::load_from(LoadOptions::default(), &both).expect("load");
        assert_eq!(config.logging.level, "error");
    }

    #[test]
    fn overrides_beat_env_which_beats_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"

[workflow]
items_per_page = 50
system_actor_id = "system:file-rules"
catalog_path = "catalog-from-file.toml"
"#,
        );
        let vars = env(&[
            ("WAYMARK_DATABASE_URL", "sqlite://from-env.db"),
            ("WAYMARK_WORKFLOW_SYSTEM_ACTOR_ID", "system:env-rules"),
            ("WAYMARK_WORKFLOW_ITEMS_PER_PAGE", "  "),
        ]);

        let config = AppConfig::load_from(
            LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    catalog_path: Some(PathBuf::from("catalog-from-override.toml")),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            },
            &vars,
        )
        .expect("load");

        assert_eq!(config.database.url, "sqlite://from-override.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.workflow.system_actor_id, "system:env-rules");
        assert_eq!(config.workflow.items_per_page, 50);
        assert_eq!(config.workflow.catalog_path, Some(PathBuf::from("catalog-from-override.toml")));
    }

    #[test]
    fn unparsable_env_values_name_the_variable() {
        let vars = env(&[("WAYMARK_WORKFLOW_REVIEW_SLA_HOURS", "two days")]);
        let error = AppConfig::load_from(LoadOptions::default(), &vars).expect_err("bad number");

        match &error {
            ConfigError::InvalidEnvOverride { key, .. } => {
                assert_eq!(key, "WAYMARK_WORKFLOW_REVIEW_SLA_HOURS");
            }
            other => panic!("expected an env override error, got {other:?}"),
        }
    }

    #[test]
    fn validation_lists_every_problem() {
        let vars = env(&[
            ("WAYMARK_DATABASE_URL", "postgres://localhost/waymark"),
            ("WAYMARK_WORKFLOW_REVIEW_SLA_HOURS", "0"),
        ]);
        let error = AppConfig::load_from(LoadOptions::default(), &vars).expect_err("invalid");

        let message = match error {
            ConfigError::Validation(message) => message,
            other => panic!("expected a validation error, got {other:?}"),
        };
        assert!(message.contains("database.url"));
        assert!(message.contains("workflow.review_sla_hours"));
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load_from(
            LoadOptions {
                config_path: Some(PathBuf::from("/nonexistent/waymark.toml")),
                require_file: true,
                overrides: ConfigOverrides::default(),
            },
            &env(&[]),
        );
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }
}
