//! Agent configuration.
//!
//! Precedence, lowest first: built-in defaults, `APP_*` environment
//! variables, then the optional `agent.json` override file in the data
//! directory. The CLI applies its own flags on top of the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Name of the local override file inside the data directory.
pub const OVERRIDE_FILE: &str = "agent.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub base_url: String,
    pub enroll_path: String,
    pub metrics_path: String,
    pub inventory_path: String,
    pub enrollment_token: String,
    pub data_dir: PathBuf,

    pub agent_name: String,
    pub agent_version: String,
    pub schema_version: String,
    pub timeout_sec: u64,

    pub metrics_interval_sec: u64,
    pub inventory_interval_sec: u64,

    // Outbound policy gate.
    pub enforce_https: bool,
    pub require_domain_join: bool,
    pub allowed_domains: Vec<String>,
    pub allowed_hosts: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            enroll_path: "/api/telemetry/enroll".to_string(),
            metrics_path: "/api/telemetry/metrics".to_string(),
            inventory_path: "/api/telemetry/inventory".to_string(),
            enrollment_token: String::new(),
            data_dir: default_data_dir(),
            agent_name: "hostagent".to_string(),
            agent_version: crate::VERSION.to_string(),
            schema_version: "1.0".to_string(),
            timeout_sec: 30,
            metrics_interval_sec: 60,
            inventory_interval_sec: 86_400,
            enforce_https: false,
            require_domain_join: false,
            allowed_domains: Vec::new(),
            allowed_hosts: Vec::new(),
        }
    }
}

/// Partial configuration read from `agent.json`. Every field is optional and
/// unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub enroll_path: Option<String>,
    pub metrics_path: Option<String>,
    pub inventory_path: Option<String>,
    pub enrollment_token: Option<String>,
    pub agent_name: Option<String>,
    pub timeout_sec: Option<u64>,
    pub metrics_interval_sec: Option<u64>,
    pub inventory_interval_sec: Option<u64>,
    pub enforce_https: Option<bool>,
    pub require_domain_join: Option<bool>,
    pub allowed_domains: Option<Vec<String>>,
    pub allowed_hosts: Option<Vec<String>>,
}

impl AgentConfig {
    /// Load from the process environment and the override file.
    pub fn load() -> Self {
        let mut cfg = Self::from_lookup(|key| std::env::var(key).ok());
        cfg.apply_override_file();
        cfg
    }

    /// Build from defaults plus whatever `lookup` returns for the `APP_*`
    /// keys. Values that fail to parse keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("APP_BASE_URL") {
            cfg.base_url = v;
        }
        if let Some(v) = get("APP_ENROLL_PATH") {
            cfg.enroll_path = v;
        }
        if let Some(v) = get("APP_METRICS_PATH") {
            cfg.metrics_path = v;
        }
        if let Some(v) = get("APP_INVENTORY_PATH") {
            cfg.inventory_path = v;
        }
        if let Some(v) = get("APP_ENROLLMENT_TOKEN") {
            cfg.enrollment_token = v;
        }
        if let Some(v) = get("APP_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("APP_TIMEOUT_SEC").and_then(|v| v.parse().ok()) {
            cfg.timeout_sec = v;
        }
        if let Some(v) = get("APP_METRICS_INTERVAL").and_then(|v| v.parse().ok()) {
            cfg.metrics_interval_sec = v;
        }
        if let Some(v) = get("APP_INVENTORY_INTERVAL").and_then(|v| v.parse().ok()) {
            cfg.inventory_interval_sec = v;
        }
        if let Some(v) = get("APP_ENFORCE_HTTPS").and_then(|v| parse_bool(&v)) {
            cfg.enforce_https = v;
        }
        if let Some(v) = get("APP_REQUIRE_DOMAIN_JOIN").and_then(|v| parse_bool(&v)) {
            cfg.require_domain_join = v;
        }
        if let Some(v) = get("APP_ALLOWED_DOMAINS") {
            cfg.allowed_domains = split_list(&v);
        }
        if let Some(v) = get("APP_ALLOWED_HOSTS") {
            cfg.allowed_hosts = split_list(&v);
        }
        cfg
    }

    /// Apply `<data_dir>/agent.json` if present. A malformed file is logged
    /// and otherwise ignored.
    pub fn apply_override_file(&mut self) {
        let path = self.override_file();
        if !path.exists() {
            return;
        }
        match read_overrides(&path) {
            Ok(overrides) => self.apply_overrides(overrides),
            Err(e) => log::warn!("ignoring config override {}: {e}", path.display()),
        }
    }

    pub fn apply_overrides(&mut self, o: ConfigOverrides) {
        if let Some(v) = o.base_url {
            self.base_url = v;
        }
        if let Some(v) = o.enroll_path {
            self.enroll_path = v;
        }
        if let Some(v) = o.metrics_path {
            self.metrics_path = v;
        }
        if let Some(v) = o.inventory_path {
            self.inventory_path = v;
        }
        if let Some(v) = o.enrollment_token {
            self.enrollment_token = v;
        }
        if let Some(v) = o.agent_name {
            self.agent_name = v;
        }
        if let Some(v) = o.timeout_sec {
            self.timeout_sec = v;
        }
        if let Some(v) = o.metrics_interval_sec {
            self.metrics_interval_sec = v;
        }
        if let Some(v) = o.inventory_interval_sec {
            self.inventory_interval_sec = v;
        }
        if let Some(v) = o.enforce_https {
            self.enforce_https = v;
        }
        if let Some(v) = o.require_domain_join {
            self.require_domain_join = v;
        }
        if let Some(v) = o.allowed_domains {
            self.allowed_domains = v;
        }
        if let Some(v) = o.allowed_hosts {
            self.allowed_hosts = v;
        }
    }

    /// Base URL without trailing slashes.
    pub fn norm_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.norm_base_url(), path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec.max(1))
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn override_file(&self) -> PathBuf {
        self.data_dir.join(OVERRIDE_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn validate(&self) -> Result<()> {
        if self.norm_base_url().is_empty() {
            return Err(AgentError::InvalidConfig("base_url is empty".to_string()));
        }
        Ok(())
    }
}

/// Create the data and log directories the agent writes into.
pub fn ensure_environment(cfg: &AgentConfig) -> Result<()> {
    for dir in [cfg.data_dir.clone(), cfg.log_dir()] {
        std::fs::create_dir_all(&dir).map_err(|e| {
            log::error!("cannot create directory {}: {e}", dir.display());
            AgentError::Io(e)
        })?;
        log::debug!("directory ok: {}", dir.display());
    }
    Ok(())
}

fn read_overrides(path: &Path) -> Result<ConfigOverrides> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Per-machine data directory for the current platform.
pub fn default_data_dir() -> PathBuf {
    #[cfg(windows)]
    {
        let base = std::env::var_os("PROGRAMDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        base.join("hostagent")
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/Application Support/hostagent")
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        PathBuf::from("/var/lib/hostagent")
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = AgentConfig::from_lookup(|_| None);
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.metrics_interval_sec, 60);
        assert_eq!(cfg.inventory_interval_sec, 86_400);
        assert!(!cfg.enforce_https);
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = AgentConfig::from_lookup(lookup_from(&[
            ("APP_BASE_URL", "https://telemetry.example.com/"),
            ("APP_ENROLLMENT_TOKEN", "secret"),
            ("APP_METRICS_INTERVAL", "15"),
            ("APP_TIMEOUT_SEC", "not-a-number"),
            ("APP_ENFORCE_HTTPS", "yes"),
            ("APP_ALLOWED_HOSTS", "telemetry.example.com, backup.example.com ,"),
            ("APP_DATA_DIR", "/tmp/agent"),
        ]));
        assert_eq!(cfg.norm_base_url(), "https://telemetry.example.com");
        assert_eq!(cfg.enrollment_token, "secret");
        assert_eq!(cfg.metrics_interval_sec, 15);
        assert_eq!(cfg.timeout_sec, 30);
        assert!(cfg.enforce_https);
        assert_eq!(
            cfg.allowed_hosts,
            vec!["telemetry.example.com", "backup.example.com"]
        );
        assert_eq!(cfg.state_file(), PathBuf::from("/tmp/agent/state.json"));
    }

    #[test]
    fn override_file_wins_over_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_string_lossy().to_string();
        let mut cfg = AgentConfig::from_lookup(lookup_from(&[
            ("APP_DATA_DIR", dir.as_str()),
            ("APP_METRICS_INTERVAL", "15"),
        ]));
        std::fs::write(
            cfg.override_file(),
            r#"{"metrics_interval_sec": 90, "allowed_domains": ["CORP"], "unknown_key": 1}"#,
        )
        .unwrap();
        cfg.apply_override_file();
        assert_eq!(cfg.metrics_interval_sec, 90);
        assert_eq!(cfg.allowed_domains, vec!["CORP"]);
    }

    #[test]
    fn malformed_override_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = AgentConfig {
            data_dir: tmp.path().to_path_buf(),
            ..AgentConfig::default()
        };
        std::fs::write(cfg.override_file(), "{not json").unwrap();
        let before = cfg.clone();
        cfg.apply_override_file();
        assert_eq!(cfg, before);
    }

    #[test]
    fn empty_base_url_is_invalid() {
        let cfg = AgentConfig {
            base_url: "/".to_string(),
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ensure_environment_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = AgentConfig {
            data_dir: tmp.path().join("nested"),
            ..AgentConfig::default()
        };
        ensure_environment(&cfg).unwrap();
        assert!(cfg.log_dir().is_dir());
    }
}
