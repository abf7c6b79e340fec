// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Configuration Types
//
// Defines the configuration schema for the colony control plane:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Controller worker and backoff settings
// - Agent heartbeat and recovery settings
// - Task resume settings
// - Autoscaling and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::task::FailurePolicy;

pub const API_VERSION: &str = "colony.dev/v1";
pub const KIND: &str = "ControllerConfig";

/// Top-level Kubernetes-style controller configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigManifest {
    /// API version (must be "colony.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControllerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControllerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfigSpec {
    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub agents: AgentSettings,

    #[serde(default)]
    pub tasks: TaskSettings,

    #[serde(default)]
    pub autoscaling: AutoscalingSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Concurrent workers per controller
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Every object is re-reconciled at least this often
    #[serde(default = "default_resync_interval", with = "humantime_serde")]
    pub resync_interval: Duration,

    /// First delay after a transient error
    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Cap on the per-key transient backoff
    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub backoff_max: Duration,

    /// Upper bound on any single call to an external collaborator
    #[serde(default = "default_external_call_timeout", with = "humantime_serde")]
    pub external_call_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Agent is failed after `heartbeat_interval × heartbeat_timeout_multiple` of silence
    #[serde(default = "default_heartbeat_multiple")]
    pub heartbeat_timeout_multiple: u32,

    #[serde(default = "default_recovery_cooldown", with = "humantime_serde")]
    pub recovery_cooldown: Duration,

    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

impl AgentSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_timeout_multiple
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSettings {
    #[serde(default = "default_max_resume_attempts")]
    pub max_resume_attempts: u32,

    /// Used when a task does not set `failurePolicy`
    #[serde(default)]
    pub default_failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingSettings {
    #[serde(default = "default_evaluation_interval", with = "humantime_serde")]
    pub evaluation_interval: Duration,

    /// Used when a cluster does not set `stabilizationWindow`
    #[serde(default = "default_stabilization_window", with = "humantime_serde")]
    pub stabilization_window: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus listener port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_workers() -> usize {
    2
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_base() -> Duration {
    Duration::from_millis(500)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(300)
}

fn default_external_call_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_multiple() -> u32 {
    2
}

fn default_recovery_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_max_resume_attempts() -> u32 {
    3
}

fn default_evaluation_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_stabilization_window() -> Duration {
    Duration::from_secs(300)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval: default_resync_interval(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            external_call_timeout: default_external_call_timeout(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout_multiple: default_heartbeat_multiple(),
            recovery_cooldown: default_recovery_cooldown(),
            max_recovery_attempts: default_max_recovery_attempts(),
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_resume_attempts: default_max_resume_attempts(),
            default_failure_policy: FailurePolicy::default(),
        }
    }
}

impl Default for AutoscalingSettings {
    fn default() -> Self {
        Self {
            evaluation_interval: default_evaluation_interval(),
            stabilization_window: default_stabilization_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for ControllerConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "colony-controller".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ControllerConfigSpec::default(),
        }
    }
}

impl ControllerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. COLONY_CONFIG_PATH environment variable
    /// 2. ./colony-config.yaml (working directory)
    /// 3. ~/.colony/config.yaml (user home)
    /// 4. /etc/colony/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("COLONY_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./colony-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".colony").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/colony/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("COLONY_LOG_LEVEL") {
            tracing::info!("Environment override: COLONY_LOG_LEVEL={}", val);
            self.spec.observability.logging.level = val;
        }

        if let Some(val) = lookup("COLONY_HEARTBEAT_INTERVAL_SECONDS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!(
                        "Environment override: COLONY_HEARTBEAT_INTERVAL_SECONDS={}",
                        secs
                    );
                    self.spec.agents.heartbeat_interval = Duration::from_secs(secs);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for COLONY_HEARTBEAT_INTERVAL_SECONDS: '{}'. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("COLONY_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) => {
                    tracing::info!("Environment override: COLONY_WORKERS={}", workers);
                    self.spec.controller.workers = workers;
                }
                Err(_) => tracing::warn!("Invalid value for COLONY_WORKERS: '{}'. Ignoring.", val),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let controller = &self.spec.controller;
        if controller.workers == 0 {
            anyhow::bail!("spec.controller.workers must be at least 1");
        }
        if controller.resync_interval.is_zero() {
            anyhow::bail!("spec.controller.resyncInterval must be positive");
        }
        if controller.backoff_base.is_zero() {
            anyhow::bail!("spec.controller.backoffBase must be positive");
        }
        if controller.backoff_max < controller.backoff_base {
            anyhow::bail!("spec.controller.backoffMax must not be lower than backoffBase");
        }
        if controller.external_call_timeout.is_zero() {
            anyhow::bail!("spec.controller.externalCallTimeout must be positive");
        }

        let agents = &self.spec.agents;
        if agents.heartbeat_interval.is_zero() {
            anyhow::bail!("spec.agents.heartbeatInterval must be positive");
        }
        if agents.heartbeat_timeout_multiple < 1 {
            anyhow::bail!("spec.agents.heartbeatTimeoutMultiple must be at least 1");
        }

        if self.spec.autoscaling.evaluation_interval.is_zero() {
            anyhow::bail!("spec.autoscaling.evaluationInterval must be positive");
        }

        match self.spec.observability.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("Unknown log format '{}'. Expected 'text' or 'json'", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ControllerConfigManifest::default();
        assert_eq!(manifest.api_version, "colony.dev/v1");
        assert_eq!(manifest.kind, "ControllerConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.agents.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(manifest.spec.agents.recovery_cooldown, Duration::from_secs(300));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_with_humantime_durations() {
        let yaml = r#"
apiVersion: colony.dev/v1
kind: ControllerConfig
metadata:
  name: test-controller
spec:
  controller:
    workers: 4
    externalCallTimeout: 2s
  agents:
    heartbeatInterval: 10s
    heartbeatTimeoutMultiple: 3
  tasks:
    defaultFailurePolicy: ContinueIndependent
"#;
        let manifest = ControllerConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.controller.workers, 4);
        assert_eq!(manifest.spec.controller.external_call_timeout, Duration::from_secs(2));
        assert_eq!(manifest.spec.controller.backoff_max, Duration::from_secs(300));
        assert_eq!(manifest.spec.agents.heartbeat_timeout(), Duration::from_secs(30));
        assert_eq!(
            manifest.spec.tasks.default_failure_policy,
            FailurePolicy::ContinueIndependent
        );
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = ControllerConfigManifest::default();
        manifest.apply_overrides_from(|key| match key {
            "COLONY_WORKERS" => Some("8".to_string()),
            "COLONY_HEARTBEAT_INTERVAL_SECONDS" => Some("not-a-number".to_string()),
            "COLONY_LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.controller.workers, 8);
        assert_eq!(manifest.spec.agents.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(manifest.spec.observability.logging.level, "debug");
    }

    #[test]
    fn test_validation() {
        let mut manifest = ControllerConfigManifest::default();
        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = ControllerConfigManifest::default();
        manifest.spec.controller.backoff_max = Duration::from_millis(1);
        assert!(manifest.validate().is_err());

        let mut manifest = ControllerConfigManifest::default();
        manifest.spec.agents.heartbeat_timeout_multiple = 0;
        assert!(manifest.validate().is_err());
    }
}
