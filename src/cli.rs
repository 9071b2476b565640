use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::commands::CommandReport;

#[derive(Debug, Parser)]
#[command(
    name = "graphsync",
    version,
    about = "Sync collaboration-suite content into a search index and reconcile deletions"
)]
struct Cli {
    /// Emit the command report as JSON instead of plain lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch and index source objects, recording them in the ledger.
    Sync {
        /// Restrict to one domain (teams, user_chats, calendar).
        #[arg(long)]
        domain: Option<String>,
    },
    /// Diff ledgers against live snapshots and retract deleted objects.
    Reconcile {
        #[arg(long)]
        domain: Option<String>,
        /// Compute and report deletions without dispatching or persisting.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run ingest + reconciliation cycles for every enabled domain.
    Watch {
        /// Run exactly one cycle and exit.
        #[arg(long)]
        once: bool,
        /// Loop forever with the configured sleep interval.
        #[arg(long)]
        daemon: bool,
    },
    /// Report configuration and per-domain ledger state.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for detail in &report.details {
            println!("{detail}");
        }
        for issue in &report.issues {
            eprintln!("issue: {issue}");
        }
    }

    if !report.ok {
        anyhow::bail!("command `{}` reported issues", report.command);
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match &cli.command {
        Command::Sync { domain } => commands::sync_run::run(&commands::sync_run::SyncOptions {
            domain: domain.clone(),
        })?,
        Command::Reconcile { domain, dry_run } => {
            commands::reconcile::run(&commands::reconcile::ReconcileOptions {
                domain: domain.clone(),
                dry_run: *dry_run,
            })?
        }
        Command::Watch { once, daemon } => commands::watch::run(&commands::watch::WatchOptions {
            once: *once,
            daemon: *daemon,
        })?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)
}
