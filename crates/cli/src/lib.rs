pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Inspect configuration, check model readiness, and replay UI message streams locally.",
    after_help = "Examples:\n  parley config\n  parley doctor --json\n  parley replay --prompt hello --fail-after 3"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and model client readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Stream a mock reply through the orchestrator and print the raw frames")]
    Replay {
        #[arg(long, help = "User message to send")]
        prompt: String,
        #[arg(long, value_name = "N", help = "Fail the model stream after N content chunks")]
        fail_after: Option<usize>,
        #[arg(long, value_name = "MS", default_value_t = 0, help = "Delay between chunks")]
        delay_ms: u64,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Replay { prompt, fail_after, delay_ms } => {
            commands::replay::run(commands::replay::ReplayOptions { prompt, fail_after, delay_ms })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
