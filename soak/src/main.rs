//! Soak harness: launch rankline groups repeatedly and judge their transcripts.

mod case;
mod cli;
mod config;
mod harness;
mod judge;
mod outcome;
mod report;
mod results;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "soak", version, about = "Soak harness for rankline groups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List cases under `soak/cases/`.
    List,
    /// Launch a case `runs` times and record each run.
    Run {
        case_id: String,
        #[arg(long, default_value_t = 1)]
        runs: u32,
    },
    /// Aggregate recorded runs of a case.
    Report { case_id: String },
    /// Delete recorded runs of a case.
    Clean { case_id: String },
}

fn main() -> Result<()> {
    rankline::logging::init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root),
        Command::Run { case_id, runs } => cli::run_case_by_id(&repo_root, &case_id, runs),
        Command::Report { case_id } => cli::report_case(&repo_root, &case_id),
        Command::Clean { case_id } => cli::clean_case(&repo_root, &case_id),
    }
}
