//! `hostagent state`: show what the agent has persisted.

use std::process::ExitCode;

use hostagent_core::{AgentState, StateStore};
use serde_json::Value;

use super::{GlobalOptions, load_config};

pub fn run(global: &GlobalOptions) -> ExitCode {
    let Some(cfg) = load_config(global) else {
        return ExitCode::FAILURE;
    };
    let store = StateStore::for_config(&cfg);
    if !store.exists() {
        eprintln!("No state file at {} (not enrolled yet)", store.path().display());
    }

    match render(&store.read()) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Pretty JSON with the access token masked.
fn render(state: &AgentState) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(state)?;
    if let Some(token) = value.get_mut("access_token") {
        if token.as_str().is_some_and(|t| !t.is_empty()) {
            *token = Value::String("***".to_string());
        }
    }
    serde_json::to_string_pretty(&value)
}
