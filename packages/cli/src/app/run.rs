use super::context::AppContext;
use crate::cli::root::{Cli, Command};
use crate::commands;
use crate::error::CliError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FILTERMATE_LOG";

pub fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing();
    let context = AppContext {
        db_path: cli.db,
        project: cli.project,
    };

    match cli.command {
        Command::Build(args) => commands::build::run(&context, args),
        Command::Combine(args) => commands::combine::run(&context, args),
        Command::Sanitize(args) => commands::sanitize::run(&context, args),
        Command::History(history_command) => commands::history::run(&context, history_command),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
