//! Durable agent state.
//!
//! One JSON document holds the device identity, the access token, per-kind
//! sequence counters and the last accepted inventory hash. Writes go through
//! a temp file in the same directory followed by a rename, and the previous
//! primary is kept as `state.json.bak`. Reads never fail: a broken primary
//! falls back to the backup, then to an empty record.
//!
//! # Storage Format
//!
//! - `state.json`: current record (pretty JSON object)
//! - `state.json.bak`: copy of the record that `state.json` replaced

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Policy overrides
// ---------------------------------------------------------------------------

/// Backend-supplied overrides. Known intervals are typed; anything else the
/// backend sends is kept verbatim so it survives a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(
        default,
        deserialize_with = "lenient_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub metrics_interval_sec: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub inventory_interval_sec: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Accept positive integers, floats and numeric strings. Anything else
/// (including zero and negatives) reads as "no override".
fn lenient_secs<'de, D>(de: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(de)?;
    Ok(coerce_secs(&raw))
}

pub(crate) fn coerce_secs(raw: &Value) -> Option<u64> {
    let n = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if n.is_finite() && n >= 1.0 {
        Some(n as u64)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Agent state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    pub device_id: Option<String>,
    pub access_token: Option<String>,
    pub registered_at: Option<String>,
    pub policy: Option<PolicyOverrides>,
    pub seq: BTreeMap<String, u64>,
    pub last_inventory_hash: Option<String>,
}

impl AgentState {
    /// Advance and return the counter for `kind`. First call yields 1.
    pub fn next_seq(&mut self, kind: &str) -> u64 {
        let counter = self.seq.entry(kind.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    pub fn seq_of(&self, kind: &str) -> u64 {
        self.seq.get(kind).copied().unwrap_or(0)
    }

    /// Both halves of the credential pair are present and non-empty.
    pub fn is_enrolled(&self) -> bool {
        non_empty(&self.device_id) && self.has_token()
    }

    pub fn has_token(&self) -> bool {
        non_empty(&self.access_token)
    }

    pub fn clear_credentials(&mut self) {
        self.device_id = None;
        self.access_token = None;
    }

    /// Fold an enrollment response into the state. Only the fields the
    /// response mentions are overwritten; `policy` only when it is an object.
    pub fn merge_enroll_response(&mut self, resp: &Value) {
        let Some(obj) = resp.as_object() else {
            return;
        };
        if let Some(v) = obj.get("device_id").and_then(Value::as_str) {
            self.device_id = Some(v.to_string());
        }
        if let Some(v) = obj.get("access_token").and_then(Value::as_str) {
            self.access_token = Some(v.to_string());
        }
        if let Some(v) = obj.get("registered_at").and_then(Value::as_str) {
            self.registered_at = Some(v.to_string());
        }
        if let Some(policy) = obj.get("policy").filter(|p| p.is_object()) {
            match serde_json::from_value::<PolicyOverrides>(policy.clone()) {
                Ok(p) => self.policy = Some(p),
                Err(e) => log::warn!("ignoring unreadable policy block: {e}"),
            }
        }
    }
}

fn non_empty(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(cfg: &AgentConfig) -> Self {
        Self::new(cfg.state_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the record: primary, then backup, then empty.
    pub fn read(&self) -> AgentState {
        match load(&self.path) {
            Ok(Some(state)) => return state,
            Ok(None) => {}
            Err(reason) => log::warn!(
                "state file {} unusable ({reason}), trying backup",
                self.path.display()
            ),
        }

        let backup = self.backup_path();
        match load(&backup) {
            Ok(Some(state)) => {
                log::warn!("loaded state from backup {}", backup.display());
                state
            }
            Ok(None) => AgentState::default(),
            Err(reason) => {
                log::warn!(
                    "backup {} unusable ({reason}), starting with empty state",
                    backup.display()
                );
                AgentState::default()
            }
        }
    }

    /// Atomically replace the record.
    pub fn write(&self, state: &AgentState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                log::warn!("could not refresh state backup: {e}");
            }
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;
        harden_permissions(&self.path);
        Ok(())
    }
}

/// `Ok(None)` when the file does not exist, `Err` with a reason when it
/// exists but is not a usable record.
fn load(path: &Path) -> std::result::Result<Option<AgentState>, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let value: Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("not a JSON object".to_string());
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| e.to_string())
}

#[cfg(unix)]
fn harden_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn harden_permissions(_path: &Path) {}
