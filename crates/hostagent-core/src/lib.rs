//! # hostagent-core
//!
//! Enrolls a device with a telemetry backend, then reports metrics and a
//! hardware/software inventory over HTTP. Credentials and sequence counters
//! live in a small state file that survives crashes and restarts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hostagent_core::{Agent, AgentConfig};
//!
//! let cfg = AgentConfig::load();
//! let agent = Agent::from_config(cfg).unwrap();
//!
//! let outcome = agent.run_all();
//! println!("{}", outcome.message);
//! ```
//!
//! ## Architecture
//!
//! Scheduler → Enrollment ↔ StateStore → Metrics / Inventory → Transport
//!
//! - [`StateStore`] persists identity, token, per-kind sequence counters and
//!   the last accepted inventory hash with atomic temp-file writes.
//! - [`policy::is_allowed`] gates every outbound workflow.
//! - [`Envelope`] stamps each message with a UUID, UTC time and sequence.
//! - [`Agent`] runs the enroll, metrics and inventory workflows, each
//!   returning an [`Outcome`].
//! - [`Scheduler`] keeps the device enrolled and fires the periodic tasks.

pub mod backoff;
pub mod config;
pub mod envelope;
pub mod error;
pub mod facts;
pub mod hashing;
pub mod instance;
pub mod logging;
pub mod policy;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use config::{AgentConfig, ensure_environment};
pub use envelope::{Envelope, TaskKind};
pub use error::{AgentError, FailureKind, Result};
pub use facts::{FactsSource, MetricsSampler, SystemFacts};
pub use instance::{InstanceLock, LOCK_FILE};
pub use policy::{GateDecision, HostIdentity, SystemIdentity, is_allowed};
pub use scheduler::{Clock, Intervals, Scheduler, SchedulerOptions, SystemClock};
pub use state::{AgentState, PolicyOverrides, StateStore};
pub use transport::{Credentials, HttpResponse, Transport, UreqTransport};
pub use workflow::{Agent, Outcome};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
