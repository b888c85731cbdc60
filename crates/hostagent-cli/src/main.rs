//! CLI for hostagent: enroll this machine and report metrics and inventory.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::GlobalOptions;

#[derive(Parser)]
#[command(name = "hostagent")]
#[command(about = "hostagent: enroll this machine, then report metrics and inventory")]
#[command(version = hostagent_core::VERSION)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Append log lines to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Backend base URL (overrides APP_BASE_URL and agent.json)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Data directory holding state.json and agent.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll if needed, then send inventory and one metrics sample (default)
    Run,

    /// Enroll this device and store the issued credentials
    Enroll,

    /// Send a full inventory snapshot
    Inventory,

    /// Send a metrics batch
    Metrics {
        /// Number of samples in the batch
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
        batch: u32,
    },

    /// Run the long-lived service loop until Ctrl+C
    Service {
        /// Fail if the first enrollment has not succeeded after this many seconds
        #[arg(long)]
        preflight_timeout: Option<u64>,

        /// Exit cleanly after this many seconds
        #[arg(long)]
        stop_after: Option<u64>,
    },

    /// Print the persisted agent state (access token redacted)
    State,

    /// Print collected host facts as JSON
    Facts {
        /// Full inventory facts instead of the minimal identity set
        #[arg(long, conflicts_with = "sample")]
        full: bool,

        /// One metrics sample
        #[arg(long)]
        sample: bool,
    },

    /// Start an in-memory development backend
    Devserver {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Require this X-Enrollment-Token on enroll
        #[arg(long)]
        enrollment_token: Option<String>,

        /// Metrics interval handed out in the enrollment policy
        #[arg(long, default_value = "60")]
        metrics_interval: u64,

        /// Inventory interval handed out in the enrollment policy
        #[arg(long, default_value = "86400")]
        inventory_interval: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    hostagent_core::logging::init(&cli.log_level, cli.log_file.as_deref());

    let global = GlobalOptions {
        base_url: cli.base_url,
        data_dir: cli.data_dir,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::oneshot::run(&global, commands::oneshot::Task::All),
        Commands::Enroll => commands::oneshot::run(&global, commands::oneshot::Task::Enroll),
        Commands::Inventory => {
            commands::oneshot::run(&global, commands::oneshot::Task::Inventory)
        }
        Commands::Metrics { batch } => {
            commands::oneshot::run(&global, commands::oneshot::Task::Metrics(batch as usize))
        }
        Commands::Service {
            preflight_timeout,
            stop_after,
        } => commands::service::run(&global, preflight_timeout, stop_after),
        Commands::State => commands::state::run(&global),
        Commands::Facts { full, sample } => commands::facts::run(full, sample),
        Commands::Devserver {
            host,
            port,
            enrollment_token,
            metrics_interval,
            inventory_interval,
        } => commands::devserver::run(
            &host,
            port,
            hostagent_devserver::DevServerConfig {
                enrollment_token,
                metrics_interval_sec: metrics_interval,
                inventory_interval_sec: inventory_interval,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["hostagent"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hostagent",
            "metrics",
            "--batch",
            "3",
            "--base-url",
            "http://backend:9000",
        ])
        .unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("http://backend:9000"));
        assert!(matches!(cli.command, Some(Commands::Metrics { batch: 3 })));
    }

    #[test]
    fn zero_batch_is_a_usage_error() {
        assert!(Cli::try_parse_from(["hostagent", "metrics", "--batch", "0"]).is_err());
    }

    #[test]
    fn facts_flags_conflict() {
        assert!(Cli::try_parse_from(["hostagent", "facts", "--full", "--sample"]).is_err());
    }
}
