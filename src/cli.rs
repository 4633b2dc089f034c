use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::archive::engine::RunOptions;
use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "slack-archive",
    version,
    about = "Incrementally archive a Slack workspace to local JSON"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch new messages for every selected conversation (default).
    Sync(SyncArgs),
    /// Show archive location, per-channel progress and backups.
    Status,
    /// Replace the archive with a backup snapshot (newest if unnamed).
    Restore {
        /// Snapshot directory name, e.g. backup-20240501-123000-250.
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Args)]
struct SyncArgs {
    /// Conversation types to list, comma separated.
    #[arg(long = "types", value_delimiter = ',')]
    types: Vec<String>,
    /// Only archive this channel (id or name); repeatable.
    #[arg(long = "channel")]
    channels: Vec<String>,
    /// Wipe the existing archive and download everything again.
    #[arg(long)]
    fresh: bool,
}

impl SyncArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            channel_types: self
                .types
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            channels: self.channels,
            fresh: self.fresh,
        }
    }
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}: {}", report.command, if report.ok { "ok" } else { "failed" });
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

    let report = match cli.command.unwrap_or(Command::Sync(SyncArgs::default())) {
        Command::Sync(args) => commands::sync::run(&args.into_options())?,
        Command::Status => commands::status::run()?,
        Command::Restore { name } => commands::restore::run(name.as_deref())?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} finished with {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
