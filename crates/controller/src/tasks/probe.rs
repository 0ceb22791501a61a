//! Reachability probing for a single dependency
//!
//! A probe is one bounded attempt: a TCP dial when no `httpPath` is declared,
//! otherwise a single HTTP(S) request. Failures never escape as errors; they are
//! folded into a [`ProbeOutcome`] carrying a diagnostic.

use crate::crds::{DependencyTarget, HttpProbe, ServiceDependency};
use crate::tasks::config::ControllerConfig;
use crate::tasks::types::{Error, Result};
use reqwest::Method;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::net::TcpStream;
use tracing::debug;

/// Why a dependency was not satisfied
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The declaration could not be turned into a request
    #[error("invalid probe: {0}")]
    Invalid(String),

    /// DNS, connect, TLS or timeout failure; no response was received
    #[error("transport error: {0}")]
    Transport(String),

    /// A response arrived but its status is not accepted
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
}

/// Result of a single probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub satisfied: bool,
    pub detail: String,
    pub failure: Option<ProbeFailure>,
}

impl ProbeOutcome {
    fn reachable(detail: String) -> Self {
        Self {
            satisfied: true,
            detail,
            failure: None,
        }
    }

    fn unreachable(target: &str, failure: ProbeFailure) -> Self {
        Self {
            satisfied: false,
            detail: format!("{target}: {failure}"),
            failure: Some(failure),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self.failure, Some(ProbeFailure::Transport(_)))
    }

    /// Status code of a received-but-rejected response
    pub fn rejected_status(&self) -> Option<u16> {
        match self.failure {
            Some(ProbeFailure::UnexpectedStatus(code)) => Some(code),
            _ => None,
        }
    }
}

/// Performs bounded reachability checks.
///
/// Holds two HTTP clients so skipping certificate verification is always a
/// per-dependency choice and never changes the default client.
#[derive(Clone)]
pub struct Prober {
    secure: reqwest::Client,
    insecure: reqwest::Client,
    timeout: Duration,
    cluster_domain: String,
}

impl Prober {
    pub fn new(timeout: Duration, cluster_domain: impl Into<String>) -> Result<Self> {
        let secure = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        let insecure = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build insecure HTTP client: {e}")))?;

        Ok(Self {
            secure,
            insecure,
            timeout,
            cluster_domain: cluster_domain.into(),
        })
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        Self::new(config.probe.timeout(), config.cluster_domain.clone())
    }

    /// Host to contact for `dep`, qualified with `namespace` for Services
    pub fn address(&self, target: DependencyTarget<'_>, namespace: &str) -> String {
        target.address(namespace, &self.cluster_domain)
    }

    /// Check one dependency owned by a resource in `namespace`
    pub async fn probe(&self, dep: &ServiceDependency, namespace: &str) -> ProbeOutcome {
        let label = dep.label().to_string();
        let target = match dep.target() {
            Ok(target) => target,
            Err(e) => return ProbeOutcome::unreachable(&label, ProbeFailure::Invalid(e.to_string())),
        };
        let Ok(port) = u16::try_from(dep.port) else {
            return ProbeOutcome::unreachable(
                &label,
                ProbeFailure::Invalid(format!("port {} is out of range", dep.port)),
            );
        };
        let host = self.address(target, namespace);

        match dep.http_probe() {
            None => match self.check_tcp(&host, port).await {
                Ok(()) => ProbeOutcome::reachable(format!("TCP connection to {host}:{port} established")),
                Err(failure) => ProbeOutcome::unreachable(&format!("{host}:{port}"), failure),
            },
            Some(probe) => {
                let url = probe.url(&host, dep.port);
                match self.check_http(&url, &probe).await {
                    Ok(code) => ProbeOutcome::reachable(format!("{} {url} returned {code}", probe.method())),
                    Err(failure) => ProbeOutcome::unreachable(&url, failure),
                }
            }
        }
    }

    async fn check_tcp(&self, host: &str, port: u16) -> Result<(), ProbeFailure> {
        debug!(host = %host, port, "Dialing dependency");
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(ProbeFailure::Transport(e.to_string())),
            Err(_) => Err(ProbeFailure::Transport(format!(
                "dial timed out after {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }

    async fn check_http(&self, url: &str, probe: &HttpProbe<'_>) -> Result<u16, ProbeFailure> {
        let method = Method::from_bytes(probe.method().as_bytes())
            .map_err(|e| ProbeFailure::Invalid(format!("method {:?}: {e}", probe.method())))?;
        let client = if probe.insecure {
            &self.insecure
        } else {
            &self.secure
        };

        let mut request = client.request(method, url);
        for header in probe.headers {
            request = request.header(header.name.as_str(), header.value.as_str());
        }

        debug!(url = %url, method = %probe.method(), insecure = probe.insecure, "Sending HTTP probe");
        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                ProbeFailure::Invalid(error_chain(&e))
            } else {
                ProbeFailure::Transport(error_chain(&e))
            }
        })?;

        let code = response.status().as_u16();
        drop(response);

        if probe.accepts(code) {
            Ok(code)
        } else {
            Err(ProbeFailure::UnexpectedStatus(code))
        }
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    message
}
