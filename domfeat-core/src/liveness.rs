//! Best-effort liveness filter for domain lists.
//!
//! Each domain gets exactly one check bounded by a fixed timeout that covers
//! name resolution as well as the connect. Timeouts, resolution failures and
//! refusals are all reported as "not live"; nothing is retried.

use crate::config::LivenessConfig;
use crate::error::DomfeatError;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

/// How a domain is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMethod {
    /// TCP connect to the configured ports, first success wins.
    #[default]
    Tcp,
    /// One ICMP echo through the system `ping` command.
    Icmp,
}

impl FromStr for CheckMethod {
    type Err = DomfeatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "icmp" | "ping" => Ok(Self::Icmp),
            other => Err(DomfeatError::config(format!(
                "unknown check method '{other}' (expected tcp or icmp)"
            ))),
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub domain: String,
    pub live: bool,
}

/// Checks domains for reachability.
///
/// Names are resolved with an async resolver whose per-query timeout is the
/// check timeout, so an unanswered lookup never outlives its check.
#[derive(Clone)]
pub struct LivenessChecker {
    timeout: Duration,
    concurrency: usize,
    method: CheckMethod,
    ports: Vec<u16>,
    /// Name servers to use; the system configuration when `None`.
    resolver_config: Option<ResolverConfig>,
    resolver: OnceLock<TokioAsyncResolver>,
}

impl fmt::Debug for LivenessChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessChecker")
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .field("method", &self.method)
            .field("ports", &self.ports)
            .field("resolver_config", &self.resolver_config)
            .finish_non_exhaustive()
    }
}

impl LivenessChecker {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            concurrency: config.concurrency.max(1),
            method: config.method,
            ports: config.ports.clone(),
            resolver_config: None,
            resolver: OnceLock::new(),
        }
    }

    /// Resolve through these name servers instead of the system ones.
    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver_config = Some(config);
        self.resolver = OnceLock::new();
        self
    }

    /// Set the check timeout; the resolver is rebuilt to match.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.resolver = OnceLock::new();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_method(mut self, method: CheckMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Check one domain once.
    pub async fn is_live(&self, domain: &str) -> bool {
        let domain = domain.trim().trim_end_matches('.');
        if !is_checkable(domain) {
            debug!(domain, "Skipping uncheckable domain");
            return false;
        }

        let check = async {
            match self.method {
                CheckMethod::Tcp => self.check_tcp(domain).await,
                CheckMethod::Icmp => check_icmp(domain, self.timeout).await,
            }
        };
        let live = tokio::time::timeout(self.timeout, check)
            .await
            .unwrap_or(false);
        debug!(domain, live, "Checked domain");
        live
    }

    /// Check every domain; results keep the input order.
    pub async fn check_all(&self, domains: &[String]) -> Vec<CheckResult> {
        stream::iter(domains)
            .map(|domain| async move {
                CheckResult {
                    domain: domain.clone(),
                    live: self.is_live(domain).await,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Only the domains that responded, in input order.
    pub async fn filter_live(&self, domains: &[String]) -> Vec<String> {
        self.check_all(domains)
            .await
            .into_iter()
            .filter(|r| r.live)
            .map(|r| r.domain)
            .collect()
    }
}

/// Non-empty and not something `ping` would read as an option.
fn is_checkable(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with('-')
        && !domain.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Async resolver answering within `timeout` with a single attempt.
fn bounded_resolver(
    config: ResolverConfig,
    mut opts: ResolverOpts,
    timeout: Duration,
) -> TokioAsyncResolver {
    opts.timeout = timeout;
    opts.attempts = 1;
    TokioAsyncResolver::tokio(config, opts)
}

fn system_resolver(timeout: Duration) -> TokioAsyncResolver {
    let (config, opts) = trust_dns_resolver::system_conf::read_system_conf().unwrap_or_else(|e| {
        debug!(error = %e, "No system resolver configuration, using defaults");
        (ResolverConfig::default(), ResolverOpts::default())
    });
    bounded_resolver(config, opts, timeout)
}

impl LivenessChecker {
    fn resolver(&self) -> &TokioAsyncResolver {
        self.resolver.get_or_init(|| match &self.resolver_config {
            Some(config) => bounded_resolver(config.clone(), ResolverOpts::default(), self.timeout),
            None => system_resolver(self.timeout),
        })
    }

    /// Addresses of `domain` on every configured port; empty when it does not resolve.
    async fn resolve(&self, domain: &str) -> Vec<SocketAddr> {
        match self.resolver().lookup_ip(domain).await {
            Ok(ips) => ips
                .iter()
                .flat_map(|ip| self.ports.iter().map(move |&port| SocketAddr::new(ip, port)))
                .collect(),
            Err(e) => {
                debug!(domain, error = %e, "Resolution failed");
                Vec::new()
            }
        }
    }

    async fn check_tcp(&self, domain: &str) -> bool {
        for addr in self.resolve(domain).await {
            if TcpStream::connect(addr).await.is_ok() {
                return true;
            }
        }
        false
    }
}

async fn check_icmp(domain: &str, timeout: Duration) -> bool {
    let wait_secs = timeout.as_secs().max(1).to_string();
    tokio::process::Command::new("ping")
        .args(["-c", "1", "-W", wait_secs.as_str()])
        .arg(domain)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
