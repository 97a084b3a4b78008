//! Audit scope and the ambient context handed to each plugin invocation

use crate::config::AuditConfig;
use regex::Regex;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use url::Url;

static DOMAIN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_\-.]*[A-Za-z0-9]$").ok());

fn is_domain_name(target: &str) -> bool {
    DOMAIN_PATTERN.as_ref().is_some_and(|re| re.is_match(target))
}

/// Parse a bare or bracketed IP address
fn parse_address(target: &str) -> Option<IpAddr> {
    let trimmed = target
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(target);
    trimmed.parse().ok()
}

/// Host part of an absolute URL, if `target` is one
fn url_host(target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;
    url.host_str().map(str::to_string)
}

/// The set of hosts an audit is allowed to touch
#[derive(Debug, Clone, Default)]
pub struct AuditScope {
    domains: BTreeSet<String>,
    addresses: BTreeSet<IpAddr>,
    web_pages: BTreeSet<String>,
    include_subdomains: bool,
    unbounded: bool,
}

impl AuditScope {
    /// Build a scope from user-supplied targets.
    ///
    /// Each target is a domain name, an IP address or a URL. Targets that are
    /// none of these are ignored with a debug log.
    pub fn new<I, S>(targets: I, include_subdomains: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scope = Self {
            include_subdomains,
            ..Self::default()
        };

        for target in targets {
            let target = target.as_ref().trim();
            if is_domain_name(target) {
                let domain = target.to_ascii_lowercase();
                scope.web_pages.insert(format!("http://{}/", domain));
                scope.domains.insert(domain);
            } else if let Some(address) = parse_address(target) {
                scope.web_pages.insert(format!("http://{}/", target));
                scope.addresses.insert(address);
            } else if let Some(host) = url_host(target) {
                scope.web_pages.insert(target.to_string());
                match parse_address(&host) {
                    Some(address) => {
                        scope.addresses.insert(address);
                    }
                    None => {
                        scope.domains.insert(host.to_ascii_lowercase());
                    }
                }
            } else {
                debug!(value = target, "ignoring unrecognized audit target");
            }
        }

        if include_subdomains {
            let parents: Vec<String> =
                scope.domains.iter().flat_map(|d| parent_domains(d)).collect();
            scope.domains.extend(parents);
        }
        scope
    }

    /// A scope that contains everything
    pub fn unbounded() -> Self {
        Self {
            unbounded: true,
            ..Self::default()
        }
    }

    /// Whether a host, address or URL belongs to the audit
    pub fn contains(&self, target: &str) -> bool {
        if self.unbounded {
            return true;
        }
        let target = target.trim();
        if target.is_empty() {
            return false;
        }

        let host = url_host(target).unwrap_or_else(|| target.to_string());
        if let Some(address) = parse_address(&host) {
            return self.addresses.contains(&address);
        }
        if is_domain_name(&host) {
            let host = host.to_ascii_lowercase();
            return self.domains.contains(&host)
                || (self.include_subdomains
                    && self
                        .domains
                        .iter()
                        .any(|domain| host.ends_with(&format!(".{}", domain))));
        }

        debug!(value = target, "can't determine whether target is in scope");
        false
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &IpAddr> {
        self.addresses.iter()
    }

    /// Root URLs guessed from the targets
    pub fn web_pages(&self) -> impl Iterator<Item = &str> {
        self.web_pages.iter().map(String::as_str)
    }

    pub fn is_unbounded(&self) -> bool {
        self.unbounded
    }
}

/// Parent domains of a hostname down to (not including) the bare suffix.
///
/// `a.b.example.com` yields `b.example.com` and `example.com`.
fn parent_domains(hostname: &str) -> Vec<String> {
    let labels: Vec<&str> = hostname.split('.').collect();
    (1..labels.len().saturating_sub(1))
        .map(|start| labels[start..].join("."))
        .collect()
}

/// Ambient audit state visible to plugins and reconciliation
#[derive(Debug, Clone)]
pub struct AuditContext {
    scope: Arc<AuditScope>,
    depth: u32,
    local: bool,
}

impl AuditContext {
    pub fn new(scope: AuditScope, depth: u32, local: bool) -> Self {
        Self {
            scope: Arc::new(scope),
            depth,
            local,
        }
    }

    /// Build the context described by an audit configuration
    pub fn from_config(config: &AuditConfig) -> Self {
        let scope = AuditScope::new(&config.targets, config.include_subdomains);
        Self::new(scope, config.depth, config.local)
    }

    pub fn scope(&self) -> &AuditScope {
        &self.scope
    }

    /// Discovery depth given to freshly created records
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Same context one step deeper, for plugins run on discovered data
    pub fn deeper(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            depth: self.depth.saturating_add(1),
            local: self.local,
        }
    }

    /// Whether the plugin runs outside the orchestrator's process
    pub fn is_local(&self) -> bool {
        self.local
    }
}

impl Default for AuditContext {
    fn default() -> Self {
        Self::new(AuditScope::unbounded(), 0, false)
    }
}
