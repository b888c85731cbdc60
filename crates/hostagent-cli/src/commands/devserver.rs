//! `hostagent devserver`: local backend for trying the agent out.

use std::process::ExitCode;

use hostagent_devserver::{DevServerConfig, ENROLL_PATH, INVENTORY_PATH, METRICS_PATH};

pub fn run(host: &str, port: u16, config: DevServerConfig) -> ExitCode {
    let base = format!("http://{host}:{port}");

    println!("hostagent devserver v{}", hostagent_core::VERSION);
    println!("   {base}");
    println!();
    println!("   Endpoints:");
    println!("     POST {ENROLL_PATH}");
    println!("     POST {METRICS_PATH}");
    println!("     POST {INVENTORY_PATH}");
    println!("     GET  /health");
    println!("     GET  /devices");
    match &config.enrollment_token {
        Some(_) => println!("   Enrollment requires X-Enrollment-Token"),
        None => println!("   Enrollment is open (no token required)"),
    }
    println!();
    println!("   Try:");
    println!("     hostagent --base-url {base} --data-dir ./agent-data run");
    println!();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match rt.block_on(hostagent_devserver::run_server(config, host, port)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
