//! Outbound policy gate.
//!
//! A pure predicate over the configuration and the host's identity that
//! decides whether the agent may talk to the configured backend at all.

use crate::config::AgentConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// What the gate needs to know about the machine it runs on.
pub trait HostIdentity {
    /// Directory/DNS domain the host belongs to, if any.
    fn domain(&self) -> Option<String>;
}

/// Identity queried from the running OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl HostIdentity for SystemIdentity {
    fn domain(&self) -> Option<String> {
        if let Some(d) = std::env::var("USERDOMAIN").ok().filter(|d| !d.is_empty()) {
            // A workgroup machine reports its own name as the domain.
            let host = crate::facts::hostname().unwrap_or_default();
            if !d.eq_ignore_ascii_case(&host) {
                return Some(d);
            }
        }
        crate::facts::dns_domain()
    }
}

/// Evaluate the gate. Checks run in order and the first failure wins.
pub fn is_allowed(cfg: &AgentConfig, host: &dyn HostIdentity) -> GateDecision {
    let base = cfg.norm_base_url();

    if cfg.enforce_https && !base.to_ascii_lowercase().starts_with("https://") {
        return GateDecision::deny(format!("HTTPS is required but base URL is {base}"));
    }

    if cfg.require_domain_join {
        let Some(domain) = host.domain().filter(|d| !d.is_empty()) else {
            return GateDecision::deny("host is not joined to a domain");
        };
        if !cfg.allowed_domains.is_empty()
            && !cfg
                .allowed_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&domain))
        {
            return GateDecision::deny(format!("domain {domain} is not in the allowed list"));
        }
    }

    if !cfg.allowed_hosts.is_empty() {
        let target = target_host(base);
        if !cfg
            .allowed_hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&target))
        {
            return GateDecision::deny(format!("backend host {target} is not in the allowed list"));
        }
    }

    GateDecision::allow()
}

/// Host part of a URL: scheme, userinfo, path and port removed.
pub fn target_host(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let authority = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if let Some(stripped) = authority.strip_prefix('[') {
        // IPv6 literal
        return stripped.split(']').next().unwrap_or("").to_string();
    }
    authority.split(':').next().unwrap_or("").to_string()
}
