//! `hostagent run | enroll | inventory | metrics`: one workflow, then exit.

use std::process::ExitCode;

use hostagent_core::{Agent, Outcome};

use super::{GlobalOptions, load_config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    All,
    Enroll,
    Inventory,
    Metrics(usize),
}

/// Run the task once and map its outcome to the exit code.
pub fn run(global: &GlobalOptions, task: Task) -> ExitCode {
    let Some(cfg) = load_config(global) else {
        return ExitCode::FAILURE;
    };
    let agent = match Agent::from_config(cfg) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = execute(&agent, task);
    report(&outcome)
}

fn execute(agent: &Agent, task: Task) -> Outcome {
    match task {
        Task::All => agent.run_all(),
        Task::Enroll => agent.enroll(),
        Task::Inventory => agent.inventory(),
        Task::Metrics(batch) => agent.metrics(batch),
    }
}

fn report(outcome: &Outcome) -> ExitCode {
    if outcome.success {
        println!("{}", outcome.message);
        ExitCode::SUCCESS
    } else {
        eprintln!("{}", outcome.message);
        ExitCode::FAILURE
    }
}
