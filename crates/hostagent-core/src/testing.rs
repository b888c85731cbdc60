//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::facts::{FactsSource, MetricsSampler};
use crate::policy::HostIdentity;
use crate::transport::{HttpResponse, Transport};
use crate::workflow::Agent;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<std::result::Result<HttpResponse, String>>,
    requests: Vec<RecordedRequest>,
}

/// Replays queued responses in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn push(&self, status: u16, body: Value) {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        self.push_raw(status, &body);
    }

    pub fn push_raw(&self, status: u16, body: &str) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_connection_error(&self, msg: &str) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .push_back(Err(msg.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn post_json(
        &self,
        path: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let mut script = self.inner.lock().unwrap();
        script.requests.push(RecordedRequest {
            path: path.to_string(),
            body: body.clone(),
            headers: headers.to_vec(),
        });
        match script.responses.pop_front() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(AgentError::Transport(msg)),
            None => Err(AgentError::Transport("connection refused".to_string())),
        }
    }
}

/// Same facts on every call.
#[derive(Clone)]
pub struct FixedFacts {
    pub hostname: String,
}

impl Default for FixedFacts {
    fn default() -> Self {
        Self {
            hostname: "host-01".to_string(),
        }
    }
}

impl FactsSource for FixedFacts {
    fn minimal_facts(&self) -> Value {
        json!({
            "hostname": self.hostname,
            "os": {"name": "Linux", "version": "#1 SMP", "release": "6.8.0", "arch": "x86_64"},
            "cpu": {"count": 8},
            "memory": {"total_bytes": 17_179_869_184u64},
            "user": {"primary": "ops", "domain": null},
            "hardware": {"uuid": "4C4C4544-0042", "serial": "SN-42"},
        })
    }

    fn full_facts(&self) -> Value {
        let mut v = self.minimal_facts();
        v["storage"] = json!({"disks": []});
        v["network"] = json!({"hostname": self.hostname, "domain": null, "interfaces": []});
        v["collected_at"] = json!(chrono::Utc::now().to_rfc3339());
        v
    }
}

#[derive(Clone, Default)]
pub struct FixedSampler;

impl MetricsSampler for FixedSampler {
    fn sample(&self) -> Value {
        json!({"timestamp": 1_700_000_000, "cpu_percent": 12.5})
    }
}

/// Host that is not joined to any domain.
#[derive(Clone, Default)]
pub struct NoDomain;

impl HostIdentity for NoDomain {
    fn domain(&self) -> Option<String> {
        None
    }
}

pub fn config_in(dir: &Path) -> AgentConfig {
    AgentConfig {
        data_dir: dir.to_path_buf(),
        enrollment_token: "enroll-secret".to_string(),
        ..AgentConfig::default()
    }
}

pub fn agent_with(cfg: AgentConfig, transport: ScriptedTransport) -> Agent {
    Agent::new(cfg, transport)
        .with_facts(FixedFacts::default())
        .with_sampler(FixedSampler)
        .with_identity(NoDomain)
}

pub fn agent_in(dir: &Path, transport: ScriptedTransport) -> Agent {
    agent_with(config_in(dir), transport)
}
