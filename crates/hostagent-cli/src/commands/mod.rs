pub mod devserver;
pub mod facts;
pub mod oneshot;
pub mod service;
pub mod state;

use std::path::PathBuf;

use hostagent_core::AgentConfig;

/// Flags shared by every subcommand that talks to the backend.
#[derive(Debug, Default, Clone)]
pub struct GlobalOptions {
    pub base_url: Option<String>,
    pub data_dir: Option<PathBuf>,
}

/// Defaults, then `APP_*` from `lookup`, then `agent.json`, then CLI flags.
///
/// `--data-dir` is applied before the override file so the file is read
/// from the directory the user asked for.
pub fn resolve_config<F>(global: &GlobalOptions, lookup: F) -> AgentConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = AgentConfig::from_lookup(lookup);
    if let Some(dir) = &global.data_dir {
        cfg.data_dir = dir.clone();
    }
    cfg.apply_override_file();
    if let Some(url) = &global.base_url {
        cfg.base_url = url.clone();
    }
    cfg
}

/// Resolve from the process environment and validate, printing the reason on
/// failure.
pub fn load_config(global: &GlobalOptions) -> Option<AgentConfig> {
    let cfg = resolve_config(global, |key| std::env::var(key).ok());
    match cfg.validate() {
        Ok(()) => Some(cfg),
        Err(e) => {
            eprintln!("Error: {e}");
            None
        }
    }
}
