//! Integration tests for hostagent-core.
//!
//! These drive real HTTP through `UreqTransport` against the in-memory
//! development backend:
//! enrollment → inventory (with If-None-Match) → metrics → state on disk.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use hostagent_core::{
    Agent, AgentConfig, FactsSource, FailureKind, MetricsSampler, Scheduler, StateStore,
    SystemClock, UreqTransport,
};
use hostagent_devserver::DevServerConfig;
use serde_json::{Value, json};

/// Start the devserver on an ephemeral port in a background runtime.
fn spawn_devserver(config: DevServerConfig) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            hostagent_devserver::serve(listener, config).await.unwrap();
        });
    });
    rx.recv().unwrap()
}

struct StaticFacts;

impl FactsSource for StaticFacts {
    fn minimal_facts(&self) -> Value {
        json!({
            "hostname": "it-host",
            "os": {"name": "Linux", "version": "test", "release": "6.1", "arch": "x86_64"},
            "cpu": {"count": 4},
            "memory": {"total_bytes": 8_589_934_592u64},
            "user": {"primary": "ci", "domain": null},
            "hardware": {"uuid": "IT-UUID-1", "serial": "IT-SN-1"},
        })
    }

    fn full_facts(&self) -> Value {
        let mut v = self.minimal_facts();
        v["storage"] = json!({"disks": []});
        v["network"] = json!({"hostname": "it-host", "domain": null, "interfaces": []});
        v["collected_at"] = json!(chrono::Utc::now().to_rfc3339());
        v
    }
}

struct StaticSampler;

impl MetricsSampler for StaticSampler {
    fn sample(&self) -> Value {
        json!({"timestamp": 1, "cpu_percent": 1.0})
    }
}

fn config(addr: SocketAddr, dir: &Path, token: &str) -> AgentConfig {
    AgentConfig {
        base_url: format!("http://{addr}/"),
        data_dir: dir.to_path_buf(),
        enrollment_token: token.to_string(),
        timeout_sec: 5,
        ..AgentConfig::default()
    }
}

fn agent(cfg: AgentConfig) -> Agent {
    let transport = UreqTransport::new(&cfg).unwrap();
    Agent::new(cfg, transport)
        .with_facts(StaticFacts)
        .with_sampler(StaticSampler)
}

#[test]
fn full_pipeline_against_devserver() {
    let addr = spawn_devserver(DevServerConfig {
        enrollment_token: Some("it-secret".into()),
        metrics_interval_sec: 30,
        inventory_interval_sec: 600,
    });
    let tmp = tempfile::tempdir().unwrap();
    let agent = agent(config(addr, tmp.path(), "it-secret"));

    let out = agent.run_all();
    assert!(out.success, "{}", out.message);
    assert!(out.message.starts_with("enroll:OK | inventory:OK | metrics:OK"));

    let st = StateStore::new(tmp.path().join("state.json")).read();
    assert!(st.is_enrolled());
    assert_eq!(st.seq_of("enroll"), 1);
    assert_eq!(st.seq_of("inventory"), 1);
    assert_eq!(st.seq_of("metrics"), 1);
    assert!(st.last_inventory_hash.is_some());
    let policy = st.policy.unwrap();
    assert_eq!(policy.metrics_interval_sec, Some(30));
    assert_eq!(policy.inventory_interval_sec, Some(600));
}

#[test]
fn unchanged_inventory_gets_not_modified() {
    let addr = spawn_devserver(DevServerConfig::default());
    let tmp = tempfile::tempdir().unwrap();
    let agent = agent(config(addr, tmp.path(), ""));

    let first = agent.inventory();
    assert!(first.success, "{}", first.message);
    assert!(first.message.starts_with("inventory accepted"));
    let hash = agent.store().read().last_inventory_hash.unwrap();

    let second = agent.inventory();
    assert!(second.success, "{}", second.message);
    assert_eq!(second.message, "inventory unchanged");
    assert_eq!(agent.store().read().last_inventory_hash.unwrap(), hash);
    assert_eq!(agent.store().read().seq_of("inventory"), 2);
}

#[test]
fn wrong_enrollment_secret_is_rejected() {
    let addr = spawn_devserver(DevServerConfig {
        enrollment_token: Some("right".into()),
        ..DevServerConfig::default()
    });
    let tmp = tempfile::tempdir().unwrap();
    let agent = agent(config(addr, tmp.path(), "wrong"));

    let out = agent.enroll();
    assert!(!out.success);
    assert_eq!(out.kind, Some(FailureKind::Unauthorized));
    assert!(out.message.contains("invalid enrollment token"), "{}", out.message);
    assert!(!agent.store().exists());
}

#[test]
fn stale_token_is_unauthorized() {
    let addr = spawn_devserver(DevServerConfig::default());
    let tmp = tempfile::tempdir().unwrap();
    let agent = agent(config(addr, tmp.path(), ""));
    agent
        .store()
        .write(&hostagent_core::AgentState {
            device_id: Some("ghost".into()),
            access_token: Some("not-issued".into()),
            ..Default::default()
        })
        .unwrap();

    let out = agent.metrics(1);
    assert_eq!(out.kind, Some(FailureKind::Unauthorized));
    assert!(out.message.contains("unknown access token"));
}

#[test]
fn re_enrollment_keeps_device_id() {
    let addr = spawn_devserver(DevServerConfig::default());
    let tmp = tempfile::tempdir().unwrap();
    let agent = agent(config(addr, tmp.path(), ""));

    assert!(agent.enroll().success);
    let first = agent.store().read();
    assert!(agent.enroll().success);
    let second = agent.store().read();

    assert_eq!(first.device_id, second.device_id);
    assert_ne!(first.access_token, second.access_token);
    assert_eq!(second.seq_of("enroll"), 2);
}

#[test]
fn preflight_enrolls_with_real_clock() {
    let addr = spawn_devserver(DevServerConfig::default());
    let tmp = tempfile::tempdir().unwrap();
    let agent = agent(config(addr, tmp.path(), ""));

    let sched = Scheduler::new(&agent, SystemClock, Arc::new(AtomicBool::new(false)));
    assert!(sched.ensure_enrolled(Some(Duration::from_secs(10))).unwrap());
    assert!(agent.store().read().is_enrolled());
}

#[test]
fn unreachable_backend_fails_preflight() {
    let tmp = tempfile::tempdir().unwrap();
    // Bind and drop to get a port nobody listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let agent = agent(config(addr, tmp.path(), ""));

    let sched = Scheduler::new(&agent, SystemClock, Arc::new(AtomicBool::new(false)))
        .with_backoff(Duration::from_millis(50), Duration::from_millis(200));
    let err = sched
        .ensure_enrolled(Some(Duration::from_secs(2)))
        .unwrap_err();
    assert!(matches!(err, hostagent_core::AgentError::PreflightTimeout(_)));
}
