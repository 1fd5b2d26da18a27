pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "attest",
    about = "Attest operator CLI",
    long_about = "Apply migrations, inspect configuration, export audit reports, and verify audit seals.",
    after_help = "Examples:\n  attest migrate\n  attest config\n  attest export --start 2026-01-01 --end 2026-01-31 --format pdf\n  attest verify --start 2026-01-01"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Write an audit log report for a date range to a file")]
    Export {
        #[arg(long, help = "First day (YYYY-MM-DD) or RFC 3339 instant, inclusive")]
        start: String,
        #[arg(long, help = "Last day (YYYY-MM-DD) or RFC 3339 instant, inclusive")]
        end: String,
        #[arg(long, default_value = "csv", help = "Report format: csv or pdf")]
        format: String,
        #[arg(long, help = "Destination file; defaults to the report's download name")]
        output: Option<PathBuf>,
    },
    #[command(about = "Recompute audit entry seals and report any that no longer match")]
    Verify {
        #[arg(long, help = "Only check entries at or after this day or instant")]
        start: Option<String>,
        #[arg(long, help = "Only check entries at or before this day or instant")]
        end: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Export { start, end, format, output } => {
            commands::export::run(commands::export::ExportArgs { start, end, format, output })
        }
        Command::Verify { start, end } => commands::verify::run(start, end),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
