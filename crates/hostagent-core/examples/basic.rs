//! Basic one-shot example.
//!
//! Loads configuration from `APP_*` and `agent.json`, enrolls if needed,
//! then sends one inventory snapshot and one metrics sample.
//!
//! Run: `cargo run --example basic`
//! (start a backend first: `hostagent devserver`)

use hostagent_core::{Agent, AgentConfig};

fn main() {
    let cfg = AgentConfig::load();
    println!("Backend: {}", cfg.norm_base_url());
    println!("State:   {}", cfg.state_file().display());

    let agent = match Agent::from_config(cfg) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("cannot build agent: {e}");
            std::process::exit(1);
        }
    };

    // enroll → inventory → metrics
    let outcome = agent.run_all();
    println!("\n{}", outcome.message);

    let st = agent.store().read();
    println!(
        "\ndevice_id={} seq={:?}",
        st.device_id.as_deref().unwrap_or("-"),
        st.seq
    );
}
