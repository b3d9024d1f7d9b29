//! Agent configuration.
//!
//! Loaded from YAML (all sections optional, everything has a default), then
//! overridden from `CASE_AGENT_*` environment variables. `.env` is read first
//! by the binary via `dotenvy`.
//!
//! ```yaml
//! api:
//!   base_url: https://agents.example.com
//!   client_id: my-agent
//!   secret: s3cr3t
//! example:
//!   iterations: 3
//!   files_path: /data/samples
//!   cleanup: true
//! executor:
//!   pool_size: 4
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub api: ApiConfig,
    pub example: ExampleConfig,
    pub executor: ExecutorConfig,
    pub http: HttpConfig,
}

/// Connection settings for the remote platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
    pub request_timeout_secs: u64,
    /// Sleep between empty event fetches.
    pub event_poll_interval_ms: u64,
    pub health_check_interval_secs: u64,
    /// UP falls back to DOWN if no health check has succeeded for this long.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8085".to_string(),
            client_id: "example-agent".to_string(),
            secret: String::new(),
            request_timeout_secs: 30,
            event_poll_interval_ms: 1000,
            health_check_interval_secs: 5,
            heartbeat_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Scenario settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExampleConfig {
    /// Scenario iterations per worker.
    pub iterations: u32,
    /// Directory to pick upload files from. Falls back to the bundled sample
    /// when unset or unreadable.
    pub files_path: Option<PathBuf>,
    /// Delete every case this agent created before the workers start.
    pub cleanup: bool,
    /// Where downloaded exports are written (overwritten each time).
    pub export_output_path: PathBuf,
}

impl Default for ExampleConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            files_path: None,
            cleanup: false,
            export_output_path: PathBuf::from("./dummy.pdf"),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub pool_size: usize,
    /// Delay before each worker spawn.
    pub spawn_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            spawn_delay_ms: 500,
        }
    }
}

impl ExecutorConfig {
    pub fn spawn_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_delay_ms)
    }
}

/// Health endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `CASE_AGENT_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Split out from
    /// [`apply_env`](Self::apply_env) so tests don't touch process env.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("CASE_AGENT_API_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("CASE_AGENT_CLIENT_ID") {
            self.api.client_id = v;
        }
        if let Some(v) = lookup("CASE_AGENT_SECRET") {
            self.api.secret = v;
        }
        if let Some(v) = lookup("CASE_AGENT_ITERATIONS") {
            self.example.iterations = v
                .parse()
                .with_context(|| format!("CASE_AGENT_ITERATIONS={v}"))?;
        }
        if let Some(v) = lookup("CASE_AGENT_FILES_PATH") {
            self.example.files_path = (!v.trim().is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("CASE_AGENT_CLEANUP") {
            self.example.cleanup = v
                .parse()
                .with_context(|| format!("CASE_AGENT_CLEANUP={v}"))?;
        }
        if let Some(v) = lookup("CASE_AGENT_POOL_SIZE") {
            self.executor.pool_size = v
                .parse()
                .with_context(|| format!("CASE_AGENT_POOL_SIZE={v}"))?;
        }
        if let Some(v) = lookup("CASE_AGENT_BIND_ADDR") {
            self.http.bind_addr = v;
        }
        Ok(self)
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.example.iterations = iterations;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.executor.pool_size = pool_size;
        self
    }

    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.example.cleanup = cleanup;
        self
    }

    pub fn files_path(mut self, path: Option<PathBuf>) -> Self {
        self.example.files_path = path;
        self
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.example.iterations > 0,
            "example.iterations must be positive"
        );
        anyhow::ensure!(
            self.executor.pool_size > 0,
            "executor.pool_size must be positive"
        );
        anyhow::ensure!(
            !self.api.base_url.trim().is_empty(),
            "api.base_url must be set"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.example.iterations, 1);
        assert!(!config.example.cleanup);
        assert!(config.example.files_path.is_none());
        assert_eq!(config.executor.spawn_delay_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AgentConfig::from_yaml(
            r#"
example:
  iterations: 5
  cleanup: true
executor:
  pool_size: 8
"#,
        )
        .unwrap();

        assert_eq!(config.example.iterations, 5);
        assert!(config.example.cleanup);
        assert_eq!(config.executor.pool_size, 8);
        assert_eq!(config.executor.spawn_delay_ms, 500);
        assert_eq!(config.api.request_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CASE_AGENT_ITERATIONS", "7"),
            ("CASE_AGENT_CLEANUP", "true"),
            ("CASE_AGENT_FILES_PATH", "  "),
            ("CASE_AGENT_API_URL", "https://agents.example.invalid"),
        ]
        .into_iter()
        .collect();

        let config = AgentConfig::default()
            .files_path(Some(PathBuf::from("/tmp")))
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.example.iterations, 7);
        assert!(config.example.cleanup);
        assert!(config.example.files_path.is_none());
        assert_eq!(config.api.base_url, "https://agents.example.invalid");
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let result =
            AgentConfig::default().apply_overrides(|k| (k == "CASE_AGENT_POOL_SIZE").then(|| "many".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_values_fail_validation() {
        assert!(AgentConfig::default().iterations(0).validate().is_err());
        assert!(AgentConfig::default().pool_size(0).validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = AgentConfig::load_from_file(Path::new("/nonexistent/agent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Reading"));
    }
}
