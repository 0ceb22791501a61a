//! `BootDependency` Custom Resource Definition
//!
//! A `BootDependency` lists the upstream services or external hosts that must be
//! reachable before the Deployment with the same name (in the same namespace) is
//! allowed to start.

use kube::CustomResource;
use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied when a dependency does not declare one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

lazy_static! {
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
    static ref HTTP_METHOD: Regex = Regex::new(r"^[A-Z]+$").unwrap();
    static ref HEADER_NAME: Regex = Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").unwrap();
}

/// Custom header sent with HTTP(S) probes
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct HttpHeader {
    /// Header field name
    #[schemars(length(min = 1))]
    pub name: String,
    /// Header field value
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// URL scheme used by HTTP probes
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    #[default]
    Http,
    Https,
}

impl HttpScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpScheme::Http => "http",
            HttpScheme::Https => "https",
        }
    }
}

impl fmt::Display for HttpScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single dependency that must be reachable before the owner can start.
/// Exactly one of `service` or `host` must be specified.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDependency {
    /// Name of a Service in the same namespace (mutually exclusive with `host`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(length(min = 1))]
    pub service: Option<String>,

    /// External hostname or IP address (mutually exclusive with `service`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(length(min = 1))]
    pub host: Option<String>,

    /// TCP port that must be open on the dependency
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// HTTP(S) path to probe instead of a raw TCP check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^/.*"))]
    pub http_path: Option<String>,

    /// URL scheme for the HTTP probe (defaults to http)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_scheme: Option<HttpScheme>,

    /// Skip TLS certificate verification for HTTPS probes
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,

    /// Uppercase HTTP verb for the probe (defaults to GET)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^[A-Z]+$"))]
    pub http_method: Option<String>,

    /// Headers sent with the probe, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers: Vec<HttpHeader>,

    /// Status codes considered healthy (any 2xx when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_expected_statuses: Vec<i32>,

    /// How long the wait step may block as a Go duration, e.g. "45s", "2m" or
    /// "1.5s" (defaults to 60s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Where a dependency points
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyTarget<'a> {
    /// In-namespace Service, resolved through cluster DNS
    Service(&'a str),
    /// External hostname or IP, used verbatim
    Host(&'a str),
}

impl<'a> DependencyTarget<'a> {
    /// The declared name, as written by the user
    pub fn name(&self) -> &'a str {
        match self {
            DependencyTarget::Service(name) | DependencyTarget::Host(name) => *name,
        }
    }

    /// Network host to dial from the controller.
    ///
    /// Services are always qualified with the owning resource's namespace so the
    /// controller resolves them correctly from its own namespace.
    pub fn address(&self, namespace: &str, cluster_domain: &str) -> String {
        match self {
            DependencyTarget::Service(name) => format!("{name}.{namespace}.{cluster_domain}"),
            DependencyTarget::Host(host) => (*host).to_string(),
        }
    }
}

/// HTTP probe settings, present only when `httpPath` is set
#[derive(Clone, Copy, Debug)]
pub struct HttpProbe<'a> {
    pub path: &'a str,
    pub scheme: HttpScheme,
    pub insecure: bool,
    pub method: Option<&'a str>,
    pub headers: &'a [HttpHeader],
    pub expected_statuses: &'a [i32],
}

impl HttpProbe<'_> {
    /// Request method, GET unless declared
    pub fn method(&self) -> &str {
        self.method.unwrap_or("GET")
    }

    /// True when any field beyond path/scheme/insecure was declared
    pub fn is_customized(&self) -> bool {
        self.method.is_some() || !self.headers.is_empty() || !self.expected_statuses.is_empty()
    }

    /// Whether a response status satisfies the probe
    pub fn accepts(&self, code: u16) -> bool {
        if self.expected_statuses.is_empty() {
            return (200..300).contains(&code);
        }
        self.expected_statuses.contains(&i32::from(code))
    }

    pub fn url(&self, host: &str, port: i32) -> String {
        format!("{}://{}:{}{}", self.scheme, host, port, self.path)
    }
}

/// A malformed dependency declaration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct DeclarationError {
    pub field: String,
    pub reason: String,
}

impl DeclarationError {
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn under(mut self, prefix: &str) -> Self {
        self.field = format!("{prefix}.{}", self.field);
        self
    }
}

impl ServiceDependency {
    pub fn service(name: &str, port: i32) -> Self {
        Self {
            service: Some(name.to_string()),
            port,
            ..Self::default()
        }
    }

    pub fn host(host: &str, port: i32) -> Self {
        Self {
            host: Some(host.to_string()),
            port,
            ..Self::default()
        }
    }

    /// Resolve the exactly-one-of `service`/`host` target
    pub fn target(&self) -> Result<DependencyTarget<'_>, DeclarationError> {
        match (self.service.as_deref(), self.host.as_deref()) {
            (Some(service), None) => Ok(DependencyTarget::Service(service)),
            (None, Some(host)) => Ok(DependencyTarget::Host(host)),
            (Some(_), Some(_)) => Err(DeclarationError::new(
                "service",
                "service and host are mutually exclusive",
            )),
            (None, None) => Err(DeclarationError::new(
                "service",
                "exactly one of service or host must be set",
            )),
        }
    }

    /// Human-readable identifier for logs and events
    pub fn label(&self) -> &str {
        self.host
            .as_deref()
            .or(self.service.as_deref())
            .unwrap_or("<unset>")
    }

    /// HTTP probe view, `None` for raw TCP checks
    pub fn http_probe(&self) -> Option<HttpProbe<'_>> {
        let path = self.http_path.as_deref()?;
        Some(HttpProbe {
            path,
            scheme: self.http_scheme.unwrap_or_default(),
            insecure: self.insecure,
            method: self.http_method.as_deref(),
            headers: &self.http_headers,
            expected_statuses: &self.http_expected_statuses,
        })
    }

    /// Overall wait bound, defaulting to 60s
    pub fn timeout(&self) -> Result<Duration, DeclarationError> {
        match self.timeout.as_deref() {
            None => Ok(DEFAULT_TIMEOUT),
            Some(raw) => match parse_duration(raw) {
                Some(d) if !d.is_zero() => Ok(d),
                Some(_) => Err(DeclarationError::new("timeout", "must be positive")),
                None => Err(DeclarationError::new(
                    "timeout",
                    format!("invalid duration {raw:?}"),
                )),
            },
        }
    }

    /// Reject declarations that upstream schema validation should have caught
    pub fn validate(&self) -> Result<(), DeclarationError> {
        match self.target()? {
            DependencyTarget::Service(name) => {
                if name.len() > 63 || !DNS_LABEL.is_match(name) {
                    return Err(DeclarationError::new(
                        "service",
                        format!("{name:?} is not a valid Service name"),
                    ));
                }
            }
            DependencyTarget::Host(host) => {
                if host.is_empty()
                    || host.len() > 253
                    || host.chars().any(|c| c.is_whitespace() || c == '\0')
                {
                    return Err(DeclarationError::new(
                        "host",
                        format!("{host:?} is not a valid hostname"),
                    ));
                }
            }
        }

        if !(1..=65535).contains(&self.port) {
            return Err(DeclarationError::new(
                "port",
                format!("{} is outside 1-65535", self.port),
            ));
        }

        self.timeout()?;

        let Some(path) = self.http_path.as_deref() else {
            let stray = [
                ("httpScheme", self.http_scheme.is_some()),
                ("insecure", self.insecure),
                ("httpMethod", self.http_method.is_some()),
                ("httpHeaders", !self.http_headers.is_empty()),
                ("httpExpectedStatuses", !self.http_expected_statuses.is_empty()),
            ];
            if let Some((field, _)) = stray.iter().find(|(_, set)| *set) {
                return Err(DeclarationError::new(field, "requires httpPath to be set"));
            }
            return Ok(());
        };

        if !path.starts_with('/') {
            return Err(DeclarationError::new("httpPath", "must start with '/'"));
        }
        if path.chars().any(|c| c.is_whitespace() || c == '\0') {
            return Err(DeclarationError::new(
                "httpPath",
                "must not contain whitespace or NUL bytes",
            ));
        }
        if let Some(method) = self.http_method.as_deref() {
            if !HTTP_METHOD.is_match(method) {
                return Err(DeclarationError::new(
                    "httpMethod",
                    format!("{method:?} is not an uppercase HTTP method"),
                ));
            }
        }
        for (i, header) in self.http_headers.iter().enumerate() {
            if !HEADER_NAME.is_match(&header.name) {
                return Err(DeclarationError::new(
                    &format!("httpHeaders[{i}].name"),
                    format!("{:?} is not a valid header name", header.name),
                ));
            }
            if header.value.contains(['\r', '\n', '\0']) {
                return Err(DeclarationError::new(
                    &format!("httpHeaders[{i}].value"),
                    "must not contain line breaks or NUL bytes",
                ));
            }
        }
        if let Some(code) = self
            .http_expected_statuses
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(DeclarationError::new(
                "httpExpectedStatuses",
                format!("{code} is not an HTTP status code"),
            ));
        }

        Ok(())
    }
}

/// Parse a Go-style duration such as `45s`, `2m`, `1m30s` or `1.5s`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Signs are not
/// accepted since a wait bound is never negative.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input == "0" {
        return Some(Duration::ZERO);
    }

    let mut nanos: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (whole, fraction) = match rest[..number_len].split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (&rest[..number_len], ""),
        };
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return None;
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = unit_nanos(&rest[..unit_len])?;
        rest = &rest[unit_len..];

        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        nanos = nanos.checked_add(whole.checked_mul(unit)?)?;

        // Digits past nanosecond precision of an hour cannot change the result
        let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
        if !fraction.is_empty() {
            let scale = 10u128.pow(u32::try_from(fraction.len()).ok()?);
            let value: u128 = fraction.parse().ok()?;
            nanos = nanos.checked_add(value * unit / scale)?;
        }
    }

    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, subsec))
}

const NANOS_PER_SEC: u128 = 1_000_000_000;
const MAX_FRACTION_DIGITS: usize = 18;

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3_600 * NANOS_PER_SEC,
        _ => return None,
    })
}

/// `BootDependency` CRD gating the Deployment of the same name
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "core.bootchain-operator.ruicoelho.dev",
    version = "v1alpha1",
    kind = "BootDependency"
)]
#[kube(namespaced)]
#[kube(status = "BootDependencyStatus")]
#[kube(shortname = "bd")]
#[kube(
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[kube(printcolumn = r#"{"name":"Resolved","type":"string","jsonPath":".status.resolvedDependencies"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct BootDependencySpec {
    /// Services that must be reachable before the Deployment may start
    #[schemars(length(min = 1))]
    pub depends_on: Vec<ServiceDependency>,
}

impl BootDependencySpec {
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.depends_on.is_empty() {
            return Err(DeclarationError::new(
                "spec.dependsOn",
                "at least one dependency is required",
            ));
        }
        for (i, dep) in self.depends_on.iter().enumerate() {
            dep.validate()
                .map_err(|e| e.under(&format!("spec.dependsOn[{i}]")))?;
        }
        Ok(())
    }
}

/// Status of the `BootDependency`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BootDependencyStatus {
    /// Current state of the resource (a single `Ready` condition)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<BootDependencyCondition>,

    /// How many dependencies are currently reachable, e.g. "2/3"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_dependencies: Option<String>,
}

/// Condition for the `BootDependency`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootDependencyCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: String,

    /// Generation the condition was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message about the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_dep() -> ServiceDependency {
        ServiceDependency {
            http_path: Some("/healthz".to_string()),
            ..ServiceDependency::service("api", 8080)
        }
    }

    #[test]
    fn test_spec_deserializes_camel_case_fields() {
        let spec: BootDependencySpec = serde_json::from_value(serde_json::json!({
            "dependsOn": [
                {"service": "postgres", "port": 5432, "timeout": "30s"},
                {
                    "host": "api.example.com",
                    "port": 443,
                    "httpPath": "/ready",
                    "httpScheme": "https",
                    "insecure": true,
                    "httpMethod": "POST",
                    "httpHeaders": [{"name": "Authorization", "value": "Bearer x"}],
                    "httpExpectedStatuses": [200, 204]
                }
            ]
        }))
        .unwrap();

        assert_eq!(spec.depends_on.len(), 2);
        assert_eq!(spec.depends_on[0].timeout().unwrap(), Duration::from_secs(30));
        let probe = spec.depends_on[1].http_probe().unwrap();
        assert_eq!(probe.scheme, HttpScheme::Https);
        assert!(probe.insecure);
        assert_eq!(probe.method(), "POST");
        assert_eq!(probe.expected_statuses, &[200, 204]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_service_address_uses_owning_namespace() {
        let dep = ServiceDependency::service("postgres", 5432);
        let address = dep.target().unwrap().address("team-a", "svc.cluster.local");
        assert_eq!(address, "postgres.team-a.svc.cluster.local");

        let external = ServiceDependency::host("db.example.com", 5432);
        assert_eq!(
            external.target().unwrap().address("team-a", "svc.cluster.local"),
            "db.example.com"
        );
    }

    #[test]
    fn test_status_acceptance_defaults_to_2xx() {
        let dep = http_dep();
        let probe = dep.http_probe().unwrap();
        assert!(probe.accepts(200));
        assert!(probe.accepts(201));
        assert!(probe.accepts(204));
        assert!(!probe.accepts(301));
        assert!(!probe.accepts(503));
    }

    #[test]
    fn test_status_acceptance_uses_explicit_set() {
        let dep = ServiceDependency {
            http_expected_statuses: vec![204],
            ..http_dep()
        };
        let probe = dep.http_probe().unwrap();
        assert!(probe.accepts(204));
        assert!(!probe.accepts(200));
        assert!(probe.is_customized());
    }

    #[test]
    fn test_target_requires_exactly_one() {
        let neither = ServiceDependency {
            port: 80,
            ..ServiceDependency::default()
        };
        assert!(neither.target().is_err());

        let both = ServiceDependency {
            host: Some("example.com".to_string()),
            ..ServiceDependency::service("api", 80)
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_http_fields_without_path() {
        let dep = ServiceDependency {
            http_method: Some("POST".to_string()),
            ..ServiceDependency::service("api", 8080)
        };
        let err = dep.validate().unwrap_err();
        assert_eq!(err.field, "httpMethod");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_port = ServiceDependency::service("api", 70000);
        assert_eq!(bad_port.validate().unwrap_err().field, "port");

        let bad_method = ServiceDependency {
            http_method: Some("post".to_string()),
            ..http_dep()
        };
        assert_eq!(bad_method.validate().unwrap_err().field, "httpMethod");

        let bad_path = ServiceDependency {
            http_path: Some("healthz".to_string()),
            ..ServiceDependency::service("api", 8080)
        };
        assert_eq!(bad_path.validate().unwrap_err().field, "httpPath");

        let bad_timeout = ServiceDependency {
            timeout: Some("soon".to_string()),
            ..ServiceDependency::service("api", 8080)
        };
        assert_eq!(bad_timeout.validate().unwrap_err().field, "timeout");
    }

    #[test]
    fn test_spec_validation_qualifies_field_path() {
        let spec = BootDependencySpec {
            depends_on: vec![
                ServiceDependency::service("ok", 80),
                ServiceDependency::service("Not_A_Service", 80),
            ],
        };
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field, "spec.dependsOn[1].service");

        let empty = BootDependencySpec { depends_on: vec![] };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1500ms"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("30"), None);
        assert_eq!(parse_duration("s30"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_parse_duration_accepts_fractions_and_small_units() {
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(".5m"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h0.5m"), Some(Duration::from_secs(3630)));
        assert_eq!(parse_duration("500us"), Some(Duration::from_micros(500)));
        assert_eq!(parse_duration("500µs"), Some(Duration::from_micros(500)));
        assert_eq!(parse_duration("250ns"), Some(Duration::from_nanos(250)));
        assert_eq!(parse_duration("2.s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("."), None);
        assert_eq!(parse_duration("1.2.3s"), None);
        assert_eq!(parse_duration("-5s"), None);
        assert_eq!(parse_duration("1.5"), None);
    }

    #[test]
    fn test_fractional_timeout_validates() {
        let dep = ServiceDependency {
            timeout: Some("2.5s".to_string()),
            ..ServiceDependency::service("api", 80)
        };
        assert!(dep.validate().is_ok());
        assert_eq!(dep.timeout().unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn test_default_timeout() {
        let dep = ServiceDependency::service("api", 80);
        assert_eq!(dep.timeout().unwrap(), DEFAULT_TIMEOUT);
    }
}
