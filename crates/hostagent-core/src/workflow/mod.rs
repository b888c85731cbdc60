//! Enrollment, metrics and inventory workflows.
//!
//! Each workflow loads state, talks to the backend once and persists what it
//! learned. None of them retries or returns an error: every failure is folded
//! into an [`Outcome`] so callers only decide what to do next.

mod enroll;
mod inventory;
mod metrics;

use std::fmt;

use crate::config::AgentConfig;
use crate::error::{AgentError, FailureKind};
use crate::facts::{FactsSource, MetricsSampler, SystemFacts};
use crate::policy::{self, HostIdentity, SystemIdentity};
use crate::state::StateStore;
use crate::transport::{HttpResponse, Transport, UreqTransport};

/// Result of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub kind: Option<FailureKind>,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            kind: Some(kind),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == Some(FailureKind::Unauthorized)
    }
}

impl From<AgentError> for Outcome {
    fn from(e: AgentError) -> Self {
        Self::failure(e.kind(), e.to_string())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Everything a workflow needs: configuration, the state file and the
/// collaborators that touch the outside world.
pub struct Agent {
    config: AgentConfig,
    store: StateStore,
    transport: Box<dyn Transport>,
    facts: Box<dyn FactsSource>,
    sampler: Box<dyn MetricsSampler>,
    identity: Box<dyn HostIdentity>,
}

impl Agent {
    /// Agent backed by real HTTP and the running host.
    pub fn from_config(config: AgentConfig) -> crate::Result<Self> {
        let transport = UreqTransport::new(&config)?;
        Ok(Self::new(config, transport))
    }

    pub fn new(config: AgentConfig, transport: impl Transport + 'static) -> Self {
        let store = StateStore::for_config(&config);
        Self {
            config,
            store,
            transport: Box::new(transport),
            facts: Box::new(SystemFacts::default()),
            sampler: Box::new(SystemFacts::default()),
            identity: Box::new(SystemIdentity),
        }
    }

    pub fn with_facts(mut self, facts: impl FactsSource + 'static) -> Self {
        self.facts = Box::new(facts);
        self
    }

    pub fn with_sampler(mut self, sampler: impl MetricsSampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    pub fn with_identity(mut self, identity: impl HostIdentity + 'static) -> Self {
        self.identity = Box::new(identity);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Whether local policy lets this host talk to the configured backend.
    pub fn check_policy(&self) -> crate::Result<()> {
        let decision = policy::is_allowed(&self.config, self.identity.as_ref());
        if decision.allowed {
            Ok(())
        } else {
            Err(AgentError::PolicyDenied(decision.reason))
        }
    }

    /// Policy gate as a failure outcome, `None` when sending is allowed.
    fn gate(&self, what: &str) -> Option<Outcome> {
        let e = self.check_policy().err()?;
        log::warn!("{what} {e}");
        Some(e.into())
    }

    /// Stored access token, enrolling once if there is none.
    pub fn ensure_token(&self) -> Result<String, Outcome> {
        if let Some(token) = self.store.read().access_token.filter(|t| !t.is_empty()) {
            return Ok(token);
        }
        let enrolled = self.enroll();
        let token = self
            .store
            .read()
            .access_token
            .filter(|t| enrolled.success && !t.is_empty());
        token.ok_or_else(|| {
            let kind = enrolled.kind.unwrap_or(FailureKind::Local);
            Outcome::failure(
                kind,
                format!(
                    "no access_token after enrollment attempt: {}",
                    enrolled.message
                ),
            )
        })
    }

    /// Enroll if needed, then inventory, then one metrics sample.
    pub fn run_all(&self) -> Outcome {
        let mut steps: Vec<(&str, Outcome)> = Vec::with_capacity(3);

        if self.store.read().is_enrolled() {
            steps.push((
                "enroll",
                Outcome::ok("skipped: device_id and access_token already present"),
            ));
        } else {
            steps.push(("enroll", self.enroll()));
        }
        steps.push(("inventory", self.inventory()));
        steps.push(("metrics", self.metrics(1)));

        let summary = steps
            .iter()
            .map(|(name, o)| format!("{name}:{}", if o.success { "OK" } else { "FAIL" }))
            .collect::<Vec<_>>()
            .join(" | ");
        let details = steps
            .iter()
            .map(|(name, o)| format!("- {name}: {}", o.message))
            .collect::<Vec<_>>()
            .join("\n");
        let message = format!("{summary}\n{details}");

        match steps.iter().find(|(_, o)| !o.success) {
            Some((_, failed)) => Outcome {
                success: false,
                message,
                kind: failed.kind,
            },
            None => Outcome::ok(message),
        }
    }
}

/// Failure outcome for a status the workflow did not accept.
fn rejected(what: &str, resp: &HttpResponse) -> Outcome {
    let e = match resp.status {
        401 => AgentError::Unauthorized(resp.body.clone()),
        status => AgentError::Backend {
            status,
            body: resp.body.clone(),
        },
    };
    log::warn!("{what} rejected: {e}");
    Outcome::failure(e.kind(), format!("{what} failed: {e}"))
}

fn connection_failed(what: &str, e: AgentError) -> Outcome {
    log::warn!("connection error during {what}: {e}");
    let detail = match &e {
        AgentError::Transport(msg) => msg.clone(),
        other => other.to_string(),
    };
    Outcome::failure(e.kind(), format!("connection error during {what}: {detail}"))
}
