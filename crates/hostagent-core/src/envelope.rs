//! Metadata wrapper carried by every outbound message.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::state::AgentState;

/// The three kinds of message the agent sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Enroll,
    Metrics,
    Inventory,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enroll => "enroll",
            Self::Metrics => "metrics",
            Self::Inventory => "inventory",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectInfo {
    pub kind: TaskKind,
    pub full: bool,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: String,
    pub message_id: String,
    pub sent_at: String,
    pub device_id: Option<String>,
    pub agent: AgentInfo,
    pub collect: CollectInfo,
}

impl Envelope {
    /// Build an envelope stamped with the current time. Advances
    /// `state.seq[kind]`; the caller is responsible for persisting it.
    pub fn build(cfg: &AgentConfig, state: &mut AgentState, kind: TaskKind, full: bool) -> Self {
        Self::build_at(cfg, state, kind, full, Utc::now())
    }

    pub fn build_at(
        cfg: &AgentConfig,
        state: &mut AgentState,
        kind: TaskKind,
        full: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let seq = state.next_seq(kind.as_str());
        Self {
            schema_version: cfg.schema_version.clone(),
            message_id: Uuid::new_v4().to_string(),
            sent_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            device_id: state.device_id.clone(),
            agent: AgentInfo {
                name: cfg.agent_name.clone(),
                version: cfg.agent_version.clone(),
            },
            collect: CollectInfo { kind, full, seq },
        }
    }

    /// `YYYYMMDD` of the send date.
    pub fn snapshot_version(&self) -> String {
        self.sent_at.chars().take(10).filter(|c| *c != '-').collect()
    }
}
