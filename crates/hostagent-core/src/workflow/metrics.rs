use std::time::Instant;

use serde_json::{Value, json};

use super::{Agent, Outcome, connection_failed, rejected};
use crate::envelope::{Envelope, TaskKind};
use crate::transport::Credentials;

impl Agent {
    /// Collect `batch` samples (at least one) and send them in one message.
    pub fn metrics(&self, batch: usize) -> Outcome {
        let cfg = &self.config;

        if let Some(denied) = self.gate("metrics") {
            return denied;
        }
        let token = match self.ensure_token() {
            Ok(token) => token,
            Err(out) => return out,
        };
        let mut st = self.store.read();

        let started = Instant::now();
        let samples: Vec<Value> = (0..batch.max(1)).map(|_| self.sampler.sample()).collect();
        let collect_secs = started.elapsed().as_secs_f64();

        let envelope = Envelope::build(cfg, &mut st, TaskKind::Metrics, false);
        if let Err(e) = self.store.write(&st) {
            return e.into();
        }
        let payload = json!({"envelope": envelope, "data": {"samples": samples}});

        let headers = Credentials::Bearer(token).headers();
        log::info!(
            "POST {} ({} sample(s))",
            cfg.url_for(&cfg.metrics_path),
            samples.len()
        );
        let resp = match self.transport.post_json(&cfg.metrics_path, &payload, &headers) {
            Ok(resp) => resp,
            Err(e) => return connection_failed("metrics", e),
        };
        log::info!(
            "metrics response: HTTP {} (collected in {collect_secs:.2}s)",
            resp.status
        );

        if resp.is_success() {
            Outcome::ok(format!("metrics sent: {} sample(s)", samples.len()))
        } else {
            rejected("metrics", &resp)
        }
    }
}
