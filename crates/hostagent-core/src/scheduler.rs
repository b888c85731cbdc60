//! Service loop: keep the device enrolled and fire metrics and inventory on
//! their own intervals until stopped.

use std::cmp;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::backoff::{Backoff, ENROLL_BACKOFF_INITIAL, ENROLL_BACKOFF_MAX};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::state::AgentState;
use crate::workflow::{Agent, Outcome};

pub const METRICS_FLOOR: Duration = Duration::from_secs(5);
pub const INVENTORY_FLOOR: Duration = Duration::from_secs(60);

/// Jitter applied to the first fire of each task.
pub const INITIAL_JITTER: f64 = 0.05;
/// Jitter applied after every fire.
pub const STEADY_JITTER: f64 = 0.10;

pub const WAKE_MIN: Duration = Duration::from_millis(500);
pub const WAKE_MAX: Duration = Duration::from_secs(10);

/// Granularity at which sleeps check the stop flag.
const STOP_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Sleep for `total`, waking every [`STOP_POLL`] to check `stop`.
/// Returns `false` if the sleep was cut short.
pub fn sleep_interruptible(clock: &dyn Clock, stop: &AtomicBool, total: Duration) -> bool {
    let deadline = clock.now() + total;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = clock.now();
        if now >= deadline {
            return true;
        }
        clock.sleep(cmp::min(STOP_POLL, deadline - now));
    }
}

/// `base` scaled by a uniform factor in `[1 - pct, 1 + pct]`.
pub fn jittered(base: Duration, pct: f64) -> Duration {
    if pct <= 0.0 {
        return base;
    }
    let factor = 1.0 + rand::rng().random_range(-pct..=pct);
    base.mul_f64(factor.max(0.0))
}

// ---------------------------------------------------------------------------
// Intervals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub metrics: Duration,
    pub inventory: Duration,
}

impl Intervals {
    /// Backend override when present, configured default otherwise, never
    /// below the per-task floor.
    pub fn effective(cfg: &AgentConfig, st: &AgentState) -> Self {
        let policy = st.policy.as_ref();
        let metrics = policy
            .and_then(|p| p.metrics_interval_sec)
            .unwrap_or(cfg.metrics_interval_sec);
        let inventory = policy
            .and_then(|p| p.inventory_interval_sec)
            .unwrap_or(cfg.inventory_interval_sec);
        Self {
            metrics: Duration::from_secs(metrics).max(METRICS_FLOOR),
            inventory: Duration::from_secs(inventory).max(INVENTORY_FLOOR),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Give up on the initial enrollment after this long.
    pub preflight_timeout: Option<Duration>,
    /// Return after running this long. Runs forever when `None`.
    pub run_for: Option<Duration>,
}

enum EnrollWait {
    Enrolled,
    Stopped,
    Expired,
    Denied(AgentError),
}

pub struct Scheduler<'a, C: Clock = SystemClock> {
    agent: &'a Agent,
    clock: C,
    stop: Arc<AtomicBool>,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl<'a, C: Clock> Scheduler<'a, C> {
    pub fn new(agent: &'a Agent, clock: C, stop: Arc<AtomicBool>) -> Self {
        Self {
            agent,
            clock,
            stop,
            backoff_initial: ENROLL_BACKOFF_INITIAL,
            backoff_max: ENROLL_BACKOFF_MAX,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn sleep(&self, d: Duration) -> bool {
        sleep_interruptible(&self.clock, &self.stop, d)
    }

    /// Enroll until it works, backing off between attempts. `Ok(false)`
    /// means the stop flag was raised first. A policy denial is returned
    /// at once without retrying.
    pub fn ensure_enrolled(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| self.clock.now() + t);
        match self.enroll_with_backoff(deadline) {
            EnrollWait::Enrolled => Ok(true),
            EnrollWait::Stopped => Ok(false),
            EnrollWait::Expired => Err(AgentError::PreflightTimeout(timeout.unwrap_or_default())),
            EnrollWait::Denied(e) => Err(e),
        }
    }

    fn enroll_with_backoff(&self, deadline: Option<Instant>) -> EnrollWait {
        let store = self.agent.store();
        let mut backoff =
            Backoff::new(self.backoff_initial, self.backoff_max).with_deadline(deadline);
        loop {
            if self.stopped() {
                return EnrollWait::Stopped;
            }
            let st = store.read();
            if st.is_enrolled() {
                log::info!(
                    "device enrolled (device_id={})",
                    st.device_id.as_deref().unwrap_or("-")
                );
                return EnrollWait::Enrolled;
            }
            if let Err(e) = self.agent.check_policy() {
                log::error!("enrollment not attempted: {e}");
                return EnrollWait::Denied(e);
            }

            let out = self.agent.enroll();
            if out.success && store.read().is_enrolled() {
                log::info!("{}", out.message);
                return EnrollWait::Enrolled;
            }

            let Some(delay) = backoff.next_delay(self.clock.now()) else {
                log::warn!("enrollment still failing at deadline: {}", out.message);
                return EnrollWait::Expired;
            };
            log::warn!(
                "enrollment failed ({}), retrying in {:.0}s",
                out.message,
                delay.as_secs_f64()
            );
            if !self.sleep(delay) {
                return EnrollWait::Stopped;
            }
        }
    }

    /// Preflight enrollment, then the steady-state loop.
    pub fn run(&self, opts: &SchedulerOptions) -> Result<()> {
        if !self.ensure_enrolled(opts.preflight_timeout)? {
            log::info!("stop requested during preflight");
            return Ok(());
        }

        let cfg = self.agent.config();
        let store = self.agent.store();
        let end = opts.run_for.map(|d| self.clock.now() + d);

        let mut intervals = Intervals::effective(cfg, &store.read());
        let now = self.clock.now();
        let mut next_metrics = now + jittered(intervals.metrics, INITIAL_JITTER);
        let mut next_inventory = now + jittered(intervals.inventory, INITIAL_JITTER);
        log::info!(
            "service loop started: metrics every {}s, inventory every {}s",
            intervals.metrics.as_secs(),
            intervals.inventory.as_secs()
        );

        loop {
            if self.stopped() {
                log::info!("stop requested, leaving service loop");
                return Ok(());
            }
            let now = self.clock.now();
            if end.is_some_and(|e| now >= e) {
                log::info!("run budget exhausted, leaving service loop");
                return Ok(());
            }

            if !store.read().is_enrolled() {
                log::warn!("credentials missing, re-enrolling");
                match self.enroll_with_backoff(end) {
                    EnrollWait::Enrolled => {}
                    EnrollWait::Stopped | EnrollWait::Expired => continue,
                    EnrollWait::Denied(e) => return Err(e),
                }
                intervals = Intervals::effective(cfg, &store.read());
                let now = self.clock.now();
                next_metrics = now + jittered(intervals.metrics, INITIAL_JITTER);
                next_inventory = now + jittered(intervals.inventory, INITIAL_JITTER);
                continue;
            }

            if now >= next_metrics {
                let out = self.agent.metrics(1);
                self.after_fire("metrics", &out);
                next_metrics = self.clock.now() + jittered(intervals.metrics, STEADY_JITTER);
            }
            if now >= next_inventory {
                let out = self.agent.inventory();
                self.after_fire("inventory", &out);
                next_inventory = self.clock.now() + jittered(intervals.inventory, STEADY_JITTER);
            }

            let now = self.clock.now();
            let due = cmp::min(next_metrics, next_inventory);
            let mut wake = due
                .saturating_duration_since(now)
                .clamp(WAKE_MIN, WAKE_MAX);
            if let Some(e) = end {
                wake = wake.min(e.saturating_duration_since(now));
            }
            self.sleep(wake);
        }
    }

    fn after_fire(&self, what: &str, out: &Outcome) {
        if out.success {
            log::info!("{what}: {}", out.message);
            return;
        }
        log::warn!("{what}: {}", out.message);
        if out.is_unauthorized() {
            let store = self.agent.store();
            let mut st = store.read();
            st.clear_credentials();
            match store.write(&st) {
                Ok(()) => log::warn!("access token rejected, credentials cleared"),
                Err(e) => log::error!("could not clear rejected credentials: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PolicyOverrides;
    use crate::testing::{ScriptedTransport, agent_with, config_in};
    use serde_json::json;
    use std::cell::Cell;

    struct ManualClock {
        now: Cell<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Cell::new(Instant::now()),
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }

        fn sleep(&self, d: Duration) {
            self.now.set(self.now.get() + d);
        }
    }

    fn enrolled() -> AgentState {
        AgentState {
            device_id: Some("D1".into()),
            access_token: Some("T1".into()),
            ..AgentState::default()
        }
    }

    #[test]
    fn policy_override_is_floored() {
        let cfg = AgentConfig::default();
        let st = AgentState {
            policy: Some(PolicyOverrides {
                metrics_interval_sec: Some(3),
                inventory_interval_sec: Some(10),
                ..PolicyOverrides::default()
            }),
            ..AgentState::default()
        };
        let iv = Intervals::effective(&cfg, &st);
        assert_eq!(iv.metrics, Duration::from_secs(5));
        assert_eq!(iv.inventory, Duration::from_secs(60));
    }

    #[test]
    fn defaults_apply_without_policy() {
        let cfg = AgentConfig::default();
        let iv = Intervals::effective(&cfg, &AgentState::default());
        assert_eq!(iv.metrics, Duration::from_secs(60));
        assert_eq!(iv.inventory, Duration::from_secs(86_400));

        let st: AgentState =
            serde_json::from_value(json!({"policy": {"metrics_interval_sec": "abc"}})).unwrap();
        assert_eq!(Intervals::effective(&cfg, &st).metrics, Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_in_band() {
        let base = Duration::from_secs(100);
        for _ in 0..200 {
            let d = jittered(base, STEADY_JITTER);
            assert!(d >= Duration::from_secs(90) && d <= Duration::from_secs(110));
        }
        assert_eq!(jittered(base, 0.0), base);
    }

    #[test]
    fn interruptible_sleep_observes_stop() {
        let clock = ManualClock::new();
        let stop = AtomicBool::new(false);
        let start = clock.now();
        assert!(sleep_interruptible(&clock, &stop, Duration::from_secs(2)));
        assert_eq!(clock.now() - start, Duration::from_secs(2));

        stop.store(true, Ordering::Relaxed);
        assert!(!sleep_interruptible(&clock, &stop, Duration::from_secs(2)));
    }

    #[test]
    fn preflight_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        let agent = agent_with(config_in(tmp.path()), transport.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let sched = Scheduler::new(&agent, ManualClock::new(), stop);

        let err = sched.ensure_enrolled(Some(Duration::from_secs(20))).unwrap_err();
        assert!(matches!(err, AgentError::PreflightTimeout(d) if d == Duration::from_secs(20)));
        // Attempts at 0, 5, 15 and 20 seconds.
        assert_eq!(transport.requests().len(), 4);
    }

    #[test]
    fn policy_denial_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        let mut cfg = config_in(tmp.path());
        cfg.enforce_https = true;
        let agent = agent_with(cfg, transport.clone());
        let clock = ManualClock::new();
        let start = clock.now();
        let sched = Scheduler::new(&agent, clock, Arc::new(AtomicBool::new(false)));

        let err = sched.ensure_enrolled(Some(Duration::from_secs(3600))).unwrap_err();
        assert!(matches!(err, AgentError::PolicyDenied(ref r) if r.contains("HTTPS")));
        assert_eq!(sched.clock.now(), start);
        assert!(transport.requests().is_empty());

        let err = sched.run(&SchedulerOptions::default()).unwrap_err();
        assert!(matches!(err, AgentError::PolicyDenied(_)));
    }

    #[test]
    fn preflight_retries_until_enrolled() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push_raw(503, "busy");
        transport.push_connection_error("reset");
        transport.push(201, json!({"device_id": "D1", "access_token": "T1"}));
        let agent = agent_with(config_in(tmp.path()), transport.clone());
        let sched = Scheduler::new(&agent, ManualClock::new(), Arc::new(AtomicBool::new(false)));

        assert!(sched.ensure_enrolled(None).unwrap());
        assert_eq!(transport.requests().len(), 3);
        assert!(agent.store().read().is_enrolled());
    }

    #[test]
    fn stop_flag_ends_run_without_network() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        let agent = agent_with(config_in(tmp.path()), transport.clone());
        let sched = Scheduler::new(&agent, ManualClock::new(), Arc::new(AtomicBool::new(true)));
        sched.run(&SchedulerOptions::default()).unwrap();
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn metrics_fire_on_interval_within_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        for _ in 0..10 {
            transport.push(200, json!({}));
        }
        let mut cfg = config_in(tmp.path());
        cfg.metrics_interval_sec = 10;
        cfg.inventory_interval_sec = 3600;
        let agent = agent_with(cfg, transport.clone());
        agent.store().write(&enrolled()).unwrap();

        let sched = Scheduler::new(&agent, ManualClock::new(), Arc::new(AtomicBool::new(false)));
        sched
            .run(&SchedulerOptions {
                preflight_timeout: None,
                run_for: Some(Duration::from_secs(65)),
            })
            .unwrap();

        let reqs = transport.requests();
        assert!((4..=7).contains(&reqs.len()), "fired {} times", reqs.len());
        assert!(reqs.iter().all(|r| r.path == "/api/telemetry/metrics"));
        assert_eq!(agent.store().read().seq_of("metrics"), reqs.len() as u64);
    }

    #[test]
    fn unauthorized_triggers_reenrollment() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.push_raw(401, "token revoked");
        transport.push(201, json!({"device_id": "D2", "access_token": "T2"}));
        for _ in 0..5 {
            transport.push(200, json!({}));
        }
        let mut cfg = config_in(tmp.path());
        cfg.metrics_interval_sec = 10;
        let agent = agent_with(cfg, transport.clone());
        agent.store().write(&enrolled()).unwrap();

        let sched = Scheduler::new(&agent, ManualClock::new(), Arc::new(AtomicBool::new(false)));
        sched
            .run(&SchedulerOptions {
                preflight_timeout: None,
                run_for: Some(Duration::from_secs(25)),
            })
            .unwrap();

        let reqs = transport.requests();
        let paths: Vec<&str> = reqs.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            &paths[..3],
            &[
                "/api/telemetry/metrics",
                "/api/telemetry/enroll",
                "/api/telemetry/metrics"
            ]
        );
        assert_eq!(reqs[2].header("Authorization"), Some("Bearer T2"));
        let st = agent.store().read();
        assert_eq!(st.device_id.as_deref(), Some("D2"));
        assert_eq!(st.access_token.as_deref(), Some("T2"));
    }
}
