//! Configuration file support.
//!
//! Reads `<config dir>/copilot-bench/config.toml` (or an explicit path) and
//! layers the `COPILOTSTUDIOAGENT__*` environment variables on top.

use crate::error::{BenchError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_ENVIRONMENT_ID: &str = "COPILOTSTUDIOAGENT__ENVIRONMENTID";
pub const ENV_SCHEMA_NAME: &str = "COPILOTSTUDIOAGENT__SCHEMANAME";
pub const ENV_TENANT_ID: &str = "COPILOTSTUDIOAGENT__TENANTID";
pub const ENV_APP_CLIENT_ID: &str = "COPILOTSTUDIOAGENT__AGENTAPPID";
pub const ENV_TOKEN: &str = "COPILOTSTUDIOAGENT__TOKEN";
pub const ENV_TOKEN_CACHE: &str = "COPILOTSTUDIOAGENT__TOKENCACHE";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub agent: AgentConfig,
    pub run: RunConfig,
    pub archive: ArchiveConfig,
    pub dashboard: DashboardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            agent: AgentConfig::default(),
            run: RunConfig::default(),
            archive: ArchiveConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

/// Connection settings for the hosted agent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AgentConfig {
    /// Power Platform environment id.
    pub environment_id: Option<String>,
    /// Agent schema name (bot identifier).
    pub schema_name: Option<String>,
    /// Tenant whose entry is read from an MSAL token cache.
    pub tenant_id: Option<String>,
    /// App registration client id whose entry is read from an MSAL token cache.
    pub app_client_id: Option<String>,
    /// Replaces the host derived from `environment_id`.
    pub base_url: Option<String>,
    /// Bearer token. Prefer the environment variable over storing it here.
    pub token: Option<String>,
    /// JSON file holding an `access_token` field.
    pub token_cache: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            environment_id: None,
            schema_name: None,
            tenant_id: None,
            app_client_id: None,
            base_url: None,
            token: None,
            token_cache: None,
            connect_timeout_secs: 30,
        }
    }
}

/// What to do with a known planner event that lacks a required field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MalformedTelemetryPolicy {
    /// Log a warning and drop the event.
    #[default]
    Skip,
    /// Fail the run.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RunConfig {
    pub input_path: String,
    pub output_dir: String,
    pub malformed_telemetry: MalformedTelemetryPolicy,
    /// Also write the checkpoint when the agent ends the conversation.
    pub checkpoint_on_end_of_conversation: bool,
    /// Snapshots buffered before the replay loop waits for the renderer.
    pub snapshot_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_path: "./data/input.txt".into(),
            output_dir: "./data".into(),
            malformed_telemetry: MalformedTelemetryPolicy::Skip,
            checkpoint_on_end_of_conversation: false,
            snapshot_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    /// Defaults to the platform data directory.
    pub dir: Option<String>,
    pub buffer_capacity: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            buffer_capacity: 256,
        }
    }
}

/// Derived views the terminal dashboard renders.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DashboardConfig {
    pub show_correlation: bool,
    pub show_planner_table: bool,
    /// Group planner events per query instead of listing every step.
    pub aggregate_planner_steps: bool,
    pub show_latency_series: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            show_correlation: true,
            show_planner_table: true,
            aggregate_planner_steps: false,
            show_latency_series: false,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when it exists.
    /// Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BenchError::config(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
            .map_err(|e| BenchError::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "copilot-bench")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay non-empty values returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_ENVIRONMENT_ID) {
            self.agent.environment_id = Some(v);
        }
        if let Some(v) = get(ENV_SCHEMA_NAME) {
            self.agent.schema_name = Some(v);
        }
        if let Some(v) = get(ENV_TENANT_ID) {
            self.agent.tenant_id = Some(v);
        }
        if let Some(v) = get(ENV_APP_CLIENT_ID) {
            self.agent.app_client_id = Some(v);
        }
        if let Some(v) = get(ENV_TOKEN) {
            self.agent.token = Some(v);
        }
        if let Some(v) = get(ENV_TOKEN_CACHE) {
            self.agent.token_cache = Some(v);
        }
    }

    pub fn input_path(&self) -> PathBuf {
        expand_path(&self.run.input_path)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.run.output_dir)
    }

    /// Archive directory, falling back to the platform data directory.
    pub fn archive_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.archive.dir {
            return Ok(expand_path(dir));
        }
        directories::ProjectDirs::from("", "", "copilot-bench")
            .map(|dirs| dirs.data_dir().join("archive"))
            .ok_or_else(|| BenchError::config("no home directory for the run archive"))
    }

    /// JSON schema of the config file.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}

/// Expand a leading `~` and `$VAR`s; falls back to the literal path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(raw),
    }
}
