use serde_json::{Value, json};

use super::{Agent, Outcome, connection_failed, rejected};
use crate::envelope::{Envelope, TaskKind};
use crate::transport::Credentials;

impl Agent {
    /// Prove the device's identity and store the credentials the backend
    /// hands back.
    pub fn enroll(&self) -> Outcome {
        let cfg = &self.config;
        let mut st = self.store.read();

        if let Some(denied) = self.gate("enroll") {
            return denied;
        }

        let min = self.facts.minimal_facts();
        let envelope = Envelope::build(cfg, &mut st, TaskKind::Enroll, true);
        let payload = json!({
            "envelope": envelope,
            "data": {
                "fingerprint": {
                    "hostname": min["hostname"],
                    "hardware_uuid": min["hardware"]["uuid"],
                    "bios_serial": min["hardware"]["serial"],
                },
                "device_min": {
                    "os": min["os"],
                    "cpu_count": min["cpu"]["count"],
                    "memory_total_bytes": min["memory"]["total_bytes"],
                },
                "enrollment_token": cfg.enrollment_token,
            },
        });

        let headers = Credentials::Enrollment(cfg.enrollment_token.clone()).headers();
        log::info!("POST {}", cfg.url_for(&cfg.enroll_path));
        let resp = match self.transport.post_json(&cfg.enroll_path, &payload, &headers) {
            Ok(resp) => resp,
            Err(e) => return connection_failed("enroll", e),
        };
        log::info!("enroll response: HTTP {}", resp.status);

        if !resp.is_success() {
            return rejected("enroll", &resp);
        }

        let body = match resp.json() {
            Value::Null => json!({}),
            other => other,
        };
        st.merge_enroll_response(&body);
        if let Err(e) = self.store.write(&st) {
            log::error!("could not persist enrollment: {e}");
            return e.into();
        }
        let device_id = st.device_id.as_deref().unwrap_or("-");
        log::info!("enroll ok: device_id={device_id}");
        Outcome::ok(format!("enrolled: device_id={device_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::state::AgentState;
    use crate::testing::{ScriptedTransport, agent_in, agent_with, config_in};

    #[test]
    fn fresh_state_enrolls_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push(
            201,
            json!({"device_id": "D1", "access_token": "T1", "policy": {"metrics_interval_sec": 30}}),
        );
        let agent = agent_in(tmp.path(), transport.clone());

        let out = agent.enroll();
        assert!(out.success, "{}", out.message);
        assert_eq!(out.message, "enrolled: device_id=D1");

        let st = agent.store().read();
        assert_eq!(st.device_id.as_deref(), Some("D1"));
        assert_eq!(st.access_token.as_deref(), Some("T1"));
        assert_eq!(st.seq.len(), 1);
        assert_eq!(st.seq_of("enroll"), 1);
        assert_eq!(st.policy.unwrap().metrics_interval_sec, Some(30));
    }

    #[test]
    fn request_carries_fingerprint_and_secret() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push(200, json!({"device_id": "D1", "access_token": "T1"}));
        let agent = agent_in(tmp.path(), transport.clone());
        agent.enroll();

        let req = &transport.requests()[0];
        assert_eq!(req.path, "/api/telemetry/enroll");
        assert_eq!(req.header("X-Enrollment-Token"), Some("enroll-secret"));
        assert!(req.header("Authorization").is_none());

        let data = &req.body["data"];
        assert_eq!(data["fingerprint"]["hostname"], "host-01");
        assert_eq!(data["fingerprint"]["hardware_uuid"], "4C4C4544-0042");
        assert_eq!(data["fingerprint"]["bios_serial"], "SN-42");
        assert_eq!(data["device_min"]["cpu_count"], 8);
        assert_eq!(data["device_min"]["os"]["name"], "Linux");
        assert_eq!(data["enrollment_token"], "enroll-secret");

        let env = &req.body["envelope"];
        assert_eq!(env["collect"]["kind"], "enroll");
        assert_eq!(env["collect"]["full"], true);
        assert_eq!(env["collect"]["seq"], 1);
    }

    #[test]
    fn unauthorized_keeps_state_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push_raw(401, "invalid enrollment token");
        let agent = agent_in(tmp.path(), transport);
        let before = AgentState {
            device_id: Some("OLD".into()),
            access_token: Some("OLD-T".into()),
            ..AgentState::default()
        };
        agent.store().write(&before).unwrap();

        let out = agent.enroll();
        assert!(!out.success);
        assert_eq!(out.kind, Some(FailureKind::Unauthorized));
        assert!(out.message.contains("invalid enrollment token"));
        assert_eq!(agent.store().read(), before);
    }

    #[test]
    fn server_error_reports_status_and_body() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push_raw(503, "maintenance");
        let agent = agent_in(tmp.path(), transport);
        let out = agent.enroll();
        assert!(!out.success);
        assert_eq!(out.kind, Some(FailureKind::Backend));
        assert!(out.message.contains("503"));
        assert!(out.message.contains("maintenance"));
        assert!(!agent.store().exists());
    }

    #[test]
    fn connection_error_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push_connection_error("connection refused");
        let agent = agent_in(tmp.path(), transport);
        let out = agent.enroll();
        assert_eq!(out.kind, Some(FailureKind::Transport));
        assert_eq!(out.message, "connection error during enroll: connection refused");
    }

    #[test]
    fn policy_denial_skips_network() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        let mut cfg = config_in(tmp.path());
        cfg.enforce_https = true;
        let agent = agent_with(cfg, transport.clone());

        let out = agent.enroll();
        assert!(!out.success);
        assert_eq!(out.kind, Some(FailureKind::PolicyDenied));
        assert!(out.message.contains("HTTPS"));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn lenient_success_with_unexpected_2xx() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push(208, json!({"device_id": "D2", "access_token": "T2"}));
        let agent = agent_in(tmp.path(), transport);
        assert!(agent.enroll().success);
        assert!(agent.store().read().is_enrolled());
    }
}
