//! Wait-script synthesis
//!
//! Turns one dependency declaration into the `sh -c` body of a blocking
//! init step. Pure: the same declaration always yields the same step name and
//! command text.

use crate::crds::{DeclarationError, HttpProbe, ServiceDependency};
use std::borrow::Cow;
use std::fmt::Write as _;
use std::time::Duration;

/// Seconds between attempts inside every wait loop
const RETRY_INTERVAL_SECS: u32 = 1;

/// Upper bound on one attempt inside the wait loop
const ATTEMPT_TIMEOUT_SECS: u32 = 3;

/// Kubernetes container names are DNS labels
const MAX_STEP_NAME_LEN: usize = 63;

/// How a wait step checks its dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// `nc -z` against host and port
    RawSocket,
    /// `wget --spider` against the probe URL
    SimpleHttp,
    /// `curl` with method, headers and status matching
    FullHttp,
}

impl WaitStrategy {
    pub fn classify(dep: &ServiceDependency) -> Self {
        match dep.http_probe() {
            None => WaitStrategy::RawSocket,
            Some(probe) if probe.is_customized() => WaitStrategy::FullHttp,
            Some(_) => WaitStrategy::SimpleHttp,
        }
    }

    /// Only the full strategy needs an image that ships curl
    pub fn needs_curl(self) -> bool {
        matches!(self, WaitStrategy::FullHttp)
    }
}

/// A synthesized init step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitStep {
    pub name: String,
    pub strategy: WaitStrategy,
    pub command: String,
}

/// `wait-for-<target>`, folded into a valid container name
pub fn step_name(dep: &ServiceDependency) -> Result<String, DeclarationError> {
    let target = dep.target()?;
    Ok(container_name(&format!("wait-for-{}", target.name())))
}

fn container_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(MAX_STEP_NAME_LEN);
    name.trim_end_matches('-').to_string()
}

pub fn synthesize(dep: &ServiceDependency) -> Result<WaitStep, DeclarationError> {
    dep.validate()?;

    let name = step_name(dep)?;
    let target = dep.target()?;
    let timeout = dep.timeout()?;
    let strategy = WaitStrategy::classify(dep);
    let host = target.name();

    let (subject, check) = match dep.http_probe() {
        None => (
            format!("{host}:{}", dep.port),
            format!(
                "nc -z -w {ATTEMPT_TIMEOUT_SECS} {} {}",
                quote(target_field(dep), host)?,
                dep.port
            ),
        ),
        Some(probe) => {
            let url = probe.url(host, dep.port);
            let check = match strategy {
                WaitStrategy::FullHttp => curl_check(&probe, &url)?,
                _ => wget_check(&probe, &url)?,
            };
            (url, check)
        }
    };

    Ok(WaitStep {
        name,
        strategy,
        command: wait_loop(&subject, &check, timeout)?,
    })
}

fn target_field(dep: &ServiceDependency) -> &'static str {
    if dep.host.is_some() {
        "host"
    } else {
        "service"
    }
}

fn wget_check(probe: &HttpProbe<'_>, url: &str) -> Result<String, DeclarationError> {
    let mut check = format!("wget -T {ATTEMPT_TIMEOUT_SECS} -q --spider");
    if probe.insecure {
        check.push_str(" --no-check-certificate");
    }
    let _ = write!(check, " {}", quote("httpPath", url)?);
    Ok(check)
}

fn curl_check(probe: &HttpProbe<'_>, url: &str) -> Result<String, DeclarationError> {
    let mut request = format!(
        "curl -s -o /dev/null -w %{{http_code}} --max-time {ATTEMPT_TIMEOUT_SECS}"
    );
    if probe.insecure {
        request.push_str(" -k");
    }
    // `-X HEAD` leaves curl waiting for a body the server never sends
    match probe.method() {
        "HEAD" => request.push_str(" -I"),
        method => {
            let _ = write!(request, " -X {}", quote("httpMethod", method)?);
        }
    }
    for (i, header) in probe.headers.iter().enumerate() {
        let field = format!("httpHeaders[{i}]");
        let _ = write!(
            request,
            " -H {}",
            quote(&field, &format!("{}: {}", header.name, header.value))?
        );
    }
    let _ = write!(request, " {}", quote("httpPath", url)?);

    Ok(format!(
        "code=$({request}) && {}",
        status_test(probe.expected_statuses)
    ))
}

fn status_test(expected: &[i32]) -> String {
    if expected.is_empty() {
        return r#"[ "$code" -ge 200 ] && [ "$code" -lt 300 ]"#.to_string();
    }
    let alternatives = expected
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join("|");
    format!(r#"case "$code" in {alternatives}) true;; *) false;; esac"#)
}

/// `echo waiting; timeout Ns sh -c 'until CHECK; do sleep 1; done' && echo ready`
fn wait_loop(subject: &str, check: &str, timeout: Duration) -> Result<String, DeclarationError> {
    let inner = format!("until {check}; do sleep {RETRY_INTERVAL_SECS}; done");
    Ok(format!(
        "echo {}; timeout {}s sh -c {} && echo {}",
        quote("target", &format!("Waiting for {subject}..."))?,
        whole_seconds(timeout),
        quote("target", &inner)?,
        quote("target", &format!("{subject} is ready"))?,
    ))
}

/// Rounded up so sub-second remainders never shorten the wait
fn whole_seconds(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

fn quote(field: &str, word: &str) -> Result<String, DeclarationError> {
    shlex::try_quote(word)
        .map(Cow::into_owned)
        .map_err(|_| DeclarationError::new(field, "must not contain NUL bytes"))
}
