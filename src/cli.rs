use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Parser)]
#[command(
    name = "channel-archiver",
    version,
    about = "Archive chat channel history into daily snapshots and a merged spreadsheet"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Print the command report as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Archive every configured channel (default).
    Run,
    /// Show the resolved configuration and lock state.
    Status,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let state = if report.ok { "ok" } else { "failed" };
    println!("{}: {state}", report.command);
    for line in &report.details {
        println!("  {line}");
    }
    for line in &report.issues {
        println!("  issue: {line}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let report = match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::archive::run()?,
        Command::Status => commands::status::run()?,
    };
    render(&report, cli.json)?;

    if report.ok {
        Ok(())
    } else {
        Err(anyhow!(
            "{} reported {} issue(s)",
            report.command,
            report.issues.len()
        ))
    }
}
