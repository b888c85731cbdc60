//! `hostagent service`: the long-lived scheduler loop.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hostagent_core::{
    Agent, InstanceLock, LOCK_FILE, Scheduler, SchedulerOptions, SystemClock, ensure_environment,
};

use super::{GlobalOptions, load_config};

pub fn run(
    global: &GlobalOptions,
    preflight_timeout: Option<u64>,
    stop_after: Option<u64>,
) -> ExitCode {
    let Some(cfg) = load_config(global) else {
        return ExitCode::FAILURE;
    };
    if let Err(e) = ensure_environment(&cfg) {
        eprintln!("Error: data directory unusable: {e}");
        return ExitCode::FAILURE;
    }

    // Held until the function returns.
    let lock = match InstanceLock::acquire(&cfg.data_dir, LOCK_FILE) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("holding {}", lock.path().display());

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    }) {
        log::warn!("cannot install Ctrl+C handler: {e}");
    }

    let agent = match Agent::from_config(cfg) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let opts = SchedulerOptions {
        preflight_timeout: preflight_timeout.map(Duration::from_secs),
        run_for: stop_after.map(Duration::from_secs),
    };
    log::info!(
        "hostagent {} service starting against {}",
        hostagent_core::VERSION,
        agent.config().norm_base_url()
    );

    match Scheduler::new(&agent, SystemClock, stop).run(&opts) {
        Ok(()) => {
            log::info!("service stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("service failed: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
