//! Controller Configuration
//!
//! Loaded from a mounted YAML file; every field has a default so a missing or
//! partial file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// DNS suffix appended to `<service>.<namespace>` when probing Services
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    /// Restrict the reconciler to one namespace (all namespaces when unset)
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Per-attempt probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Requeue cadence
    #[serde(default)]
    pub requeue: RequeueConfig,

    /// Images used for injected wait-for init containers
    #[serde(default)]
    pub images: ImagesConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    /// Bound on a single TCP dial or HTTP request, in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,
}

/// Requeue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueConfig {
    /// Delay before the next evaluation once every dependency is reachable
    #[serde(default = "default_ready_requeue")]
    pub ready_seconds: u64,

    /// Delay before the next evaluation while dependencies are missing
    #[serde(default = "default_not_ready_requeue")]
    pub not_ready_seconds: u64,
}

/// Image configuration for injected init containers
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesConfig {
    /// Image providing `nc` and `wget` (raw TCP and simple HTTP waits)
    #[serde(default = "default_busybox_image")]
    pub busybox: String,

    /// Image providing `curl` (fully specified HTTP waits)
    #[serde(default = "default_curl_image")]
    pub curl: String,

    /// Pull policy for both images
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_cluster_domain() -> String {
    "svc.cluster.local".to_string()
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_ready_requeue() -> u64 {
    30
}

fn default_not_ready_requeue() -> u64 {
    10
}

fn default_busybox_image() -> String {
    "busybox:1.36".to_string()
}

fn default_curl_image() -> String {
    "curlimages/curl:8.11.1".to_string()
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8443".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout(),
        }
    }
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            ready_seconds: default_ready_requeue(),
            not_ready_seconds: default_not_ready_requeue(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            busybox: default_busybox_image(),
            curl: default_curl_image(),
            pull_policy: default_pull_policy(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_domain: default_cluster_domain(),
            watch_namespace: None,
            probe: ProbeConfig::default(),
            requeue: RequeueConfig::default(),
            images: ImagesConfig::default(),
            server: ServerConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RequeueConfig {
    /// Shorter while waiting so readiness is picked up quickly
    pub fn delay(&self, all_ready: bool) -> Duration {
        if all_ready {
            Duration::from_secs(self.ready_seconds)
        } else {
            Duration::from_secs(self.not_ready_seconds)
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let domain = self.cluster_domain.trim();
        if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
            return Err(anyhow::anyhow!(
                "clusterDomain {:?} must be a non-empty DNS suffix without leading or trailing dots",
                self.cluster_domain
            ));
        }

        if self.probe.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("probe.timeoutSeconds must be greater than zero"));
        }

        if self.requeue.ready_seconds == 0 || self.requeue.not_ready_seconds == 0 {
            return Err(anyhow::anyhow!("requeue delays must be greater than zero"));
        }

        if self.requeue.not_ready_seconds > self.requeue.ready_seconds {
            return Err(anyhow::anyhow!(
                "requeue.notReadySeconds ({}) must not exceed requeue.readySeconds ({})",
                self.requeue.not_ready_seconds,
                self.requeue.ready_seconds
            ));
        }

        if self.images.busybox.trim().is_empty() || self.images.curl.trim().is_empty() {
            return Err(anyhow::anyhow!("images.busybox and images.curl must be set"));
        }

        if !matches!(
            self.images.pull_policy.as_str(),
            "Always" | "IfNotPresent" | "Never"
        ) {
            return Err(anyhow::anyhow!(
                "images.pullPolicy {:?} must be Always, IfNotPresent or Never",
                self.images.pull_policy
            ));
        }

        Ok(())
    }

    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }
}
