//! `hostagent facts`: dump what the collectors see on this host.

use std::process::ExitCode;

use hostagent_core::SystemFacts;

pub fn run(full: bool, sample: bool) -> ExitCode {
    let facts = SystemFacts::default();
    let rendered = if sample {
        serde_json::to_string_pretty(&facts.collect_sample())
    } else if full {
        serde_json::to_string_pretty(&facts.collect_full())
    } else {
        serde_json::to_string_pretty(&facts.collect_minimal())
    };

    match rendered {
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
