pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "tourdesk",
    about = "Tourdesk operator CLI",
    long_about = "Operate the Tourdesk back office: readiness checks, migrations, demo data, scheduled sweeps, and credential issue.",
    after_help = "Examples:\n  tourdesk doctor --json\n  tourdesk config\n  tourdesk token ops1@tourdesk.test"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Create the demo accounts and sample request (idempotent)")]
    Seed,
    #[command(about = "Expire stale quotations and mark overdue invoices")]
    Sweep,
    #[command(about = "Issue a bearer credential for an existing account")]
    Token {
        #[arg(help = "Email of the account to issue a credential for")]
        email: String,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state, and document tooling")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sweep => commands::sweep::run(),
        Command::Token { email } => commands::token::run(&email),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let output = commands::doctor::run(json);
            commands::CommandResult { exit_code: commands::doctor::exit_code(&output), output }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
