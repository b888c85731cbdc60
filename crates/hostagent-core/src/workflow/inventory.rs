use std::time::Instant;

use serde_json::{Value, json};

use super::{Agent, Outcome, connection_failed, rejected};
use crate::envelope::{Envelope, TaskKind};
use crate::hashing;
use crate::transport::Credentials;

impl Agent {
    /// Send the full inventory, letting the backend short-circuit with
    /// 304/204 when it already has this exact content.
    pub fn inventory(&self) -> Outcome {
        let cfg = &self.config;

        if let Some(denied) = self.gate("inventory") {
            return denied;
        }
        let token = match self.ensure_token() {
            Ok(token) => token,
            Err(out) => return out,
        };
        let mut st = self.store.read();

        let started = Instant::now();
        let inventory = self.facts.full_facts();
        let hash = hashing::inventory_hash(&inventory);
        let collect_secs = started.elapsed().as_secs_f64();

        let envelope = Envelope::build(cfg, &mut st, TaskKind::Inventory, true);
        if let Err(e) = self.store.write(&st) {
            return e.into();
        }

        let mut data = serde_json::Map::new();
        data.insert("snapshot_version".into(), envelope.snapshot_version().into());
        data.insert("inventory_hash".into(), hash.clone().into());
        data.insert(
            "prev_inventory_hash".into(),
            st.last_inventory_hash.clone().map_or(Value::Null, Value::from),
        );
        if let Value::Object(fields) = inventory {
            data.extend(fields);
        }
        let payload = json!({"envelope": envelope, "data": data});

        let mut headers = vec![("If-None-Match".to_string(), hash.clone())];
        headers.extend(Credentials::Bearer(token).headers());
        log::info!("POST {} (hash={hash})", cfg.url_for(&cfg.inventory_path));
        let resp = match self.transport.post_json(&cfg.inventory_path, &payload, &headers) {
            Ok(resp) => resp,
            Err(e) => return connection_failed("inventory", e),
        };
        log::info!(
            "inventory response: HTTP {} (collected in {collect_secs:.2}s)",
            resp.status
        );

        // Only an explicit accept or no-change moves the stored hash.
        let message = match resp.status {
            200 | 201 => format!("inventory accepted (hash={hash})"),
            204 | 304 => "inventory unchanged".to_string(),
            status if resp.is_success() => {
                log::info!("inventory sent: HTTP {status}, stored hash kept");
                return Outcome::ok(format!("inventory sent: HTTP {status}"));
            }
            _ => return rejected("inventory", &resp),
        };
        st.last_inventory_hash = Some(hash);
        if let Err(e) = self.store.write(&st) {
            return e.into();
        }
        log::info!("{message}");
        Outcome::ok(message)
    }
}
