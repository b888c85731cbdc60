//! HTTP transport seam.
//!
//! Workflows talk to the backend through [`Transport`] so they can be driven
//! by a scripted peer in tests. [`UreqTransport`] is the blocking production
//! implementation.

use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

/// Extra request headers, in send order.
pub type Headers = Vec<(String, String)>;

/// Connection-class failures are retried this many times.
pub const TRANSPORT_RETRIES: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(250);

/// Status and body of a completed exchange. Any status, including 4xx and
/// 5xx, is a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, `Null` when empty or not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

pub trait Transport {
    /// POST `body` as JSON to `path` (relative to the backend base URL).
    fn post_json(&self, path: &str, body: &Value, headers: &[(String, String)])
    -> Result<HttpResponse>;
}

/// Which secret a request carries.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Static enrollment secret, only ever sent by the enroll call.
    Enrollment(String),
    /// Access token issued at enrollment.
    Bearer(String),
}

impl Credentials {
    pub fn headers(&self) -> Headers {
        match self {
            Self::Enrollment(secret) if secret.is_empty() => Vec::new(),
            Self::Enrollment(secret) => {
                vec![("X-Enrollment-Token".to_string(), secret.clone())]
            }
            Self::Bearer(token) => {
                vec![("Authorization".to_string(), format!("Bearer {token}"))]
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enrollment(_) => f.write_str("Enrollment(***)"),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

/// Headers sent on every request.
pub fn default_headers(cfg: &AgentConfig) -> Headers {
    vec![
        (
            "User-Agent".to_string(),
            format!("{}/{}", cfg.agent_name, cfg.agent_version),
        ),
        ("X-Agent-Name".to_string(), cfg.agent_name.clone()),
        ("X-Agent-Version".to_string(), cfg.agent_version.clone()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ]
}

pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
    defaults: Headers,
}

impl UreqTransport {
    pub fn new(cfg: &AgentConfig) -> Result<Self> {
        cfg.validate()?;
        let agent = ureq::AgentBuilder::new().timeout(cfg.timeout()).build();
        Ok(Self {
            agent,
            base_url: cfg.norm_base_url().to_string(),
            defaults: default_headers(cfg),
        })
    }

    fn send_once(
        &self,
        url: &str,
        payload: &str,
        headers: &[(String, String)],
    ) -> std::result::Result<HttpResponse, ureq::Error> {
        let mut req = self.agent.post(url);
        for (k, v) in self.defaults.iter().chain(headers) {
            req = req.set(k, v);
        }
        match req.send_string(payload) {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.into_string().unwrap_or_default();
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Ok(HttpResponse { status, body })
            }
            Err(e) => Err(e),
        }
    }
}

impl Transport for UreqTransport {
    fn post_json(
        &self,
        path: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, path);
        let payload = serde_json::to_string(body)?;

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &payload, headers) {
                Ok(resp) => {
                    log::debug!("POST {url} -> {}", resp.status);
                    return Ok(resp);
                }
                Err(ureq::Error::Transport(t)) if attempt < TRANSPORT_RETRIES && is_retryable(&t) => {
                    attempt += 1;
                    log::debug!("POST {url} failed ({t}), retry {attempt}/{TRANSPORT_RETRIES}");
                    thread::sleep(RETRY_PAUSE);
                }
                Err(e) => return Err(AgentError::Transport(e.to_string())),
            }
        }
    }
}

fn is_retryable(t: &ureq::Transport) -> bool {
    matches!(
        t.kind(),
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io
    )
}
