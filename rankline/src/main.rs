//! rankline: print one line per rank, in rank order, across a process group.
//!
//! `rankline launch -n P` forms a group of P processes running `rankline hello`;
//! the merged stdout reads `size P`, then `Rank 0` through `Rank P-1`.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use rankline::core::group::{FormationError, ProcessGroup};
use rankline::core::ordering::{rank_sequence, verify_transcript};
use rankline::core::script::HelloScript;
use rankline::core::sequencer::{BarrierSequencer, LineSink, SequencerOptions};
use rankline::exit_codes;
use rankline::io::config::{DEFAULT_CONFIG_FILE, load_config};
use rankline::io::env::GroupEnv;
use rankline::io::launcher::{LaunchOutcome, LaunchRequest, launch};
use rankline::io::local::{LocalGroup, run_local};
use rankline::io::sink::FlushingSink;
use rankline::io::socket::SocketGroup;
use rankline::logging;

#[derive(Parser, Debug)]
#[command(
    name = "rankline",
    version,
    about = "Rank-ordered output over a barrier-synchronized process group"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Form a group, run PROGRAM once per rank, and dissolve the group.
    Launch {
        /// Number of participants (overrides the config file).
        #[arg(short = 'n', long = "np")]
        np: Option<usize>,
        /// Launcher config file.
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Kill participants still running after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Write the launch outcome as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Program and arguments; defaults to `rankline hello`.
        #[arg(last = true)]
        program: Vec<String>,
    },
    /// Participant: print `size N` (rank 0) and `Rank r` in rank order.
    Hello {
        /// Number of ordering passes over the same group.
        #[arg(long, default_value_t = 1)]
        repeat: usize,
        /// Fault injection: this rank skips its final barrier.
        #[arg(long, value_name = "RANK")]
        omit_final_sync: Option<usize>,
    },
    /// Run the ordering protocol on a thread group and print the transcript.
    Demo {
        #[arg(short = 'n', long = "np", default_value_t = 4)]
        np: usize,
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Check that a transcript is exactly the rank-ordered output of a group.
    Verify {
        #[arg(short = 'n', long = "np")]
        np: usize,
        #[arg(long, default_value_t = 1)]
        repeat: usize,
        /// Transcript file; reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Print this process's view of the group assignment.
    Info {
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            error_exit_code(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Launch {
            np,
            config,
            timeout_secs,
            report,
            program,
        } => cmd_launch(np, &config, timeout_secs, report.as_deref(), program),
        Command::Hello {
            repeat,
            omit_final_sync,
        } => cmd_hello(repeat, omit_final_sync),
        Command::Demo { np, repeat } => cmd_demo(np, repeat),
        Command::Verify { np, repeat, file } => cmd_verify(np, repeat, file.as_deref()),
        Command::Info { json } => cmd_info(json),
    }
}

fn error_exit_code(err: &anyhow::Error) -> i32 {
    if err
        .chain()
        .any(|cause| cause.downcast_ref::<FormationError>().is_some())
    {
        exit_codes::FORMATION
    } else {
        exit_codes::INVALID
    }
}

fn cmd_launch(
    np: Option<usize>,
    config: &Path,
    timeout_secs: Option<u64>,
    report: Option<&Path>,
    program: Vec<String>,
) -> Result<i32> {
    let mut cfg = load_config(config)?;
    if let Some(np) = np {
        cfg.np = np;
    }
    if timeout_secs.is_some() {
        cfg.timeout_secs = timeout_secs;
    }
    cfg.validate()?;

    let program = if program.is_empty() {
        let exe = std::env::current_exe().context("locate rankline executable")?;
        vec![exe.to_string_lossy().into_owned(), "hello".to_string()]
    } else {
        program
    };
    debug!(np = cfg.np, program = ?program, "launch configured");

    let outcome = launch(&LaunchRequest::from_config(&cfg, program))?;
    if let Some(path) = report {
        let mut payload =
            serde_json::to_string_pretty(&outcome).context("serialize launch report")?;
        payload.push('\n');
        fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(launch_exit_code(&outcome))
}

fn launch_exit_code(outcome: &LaunchOutcome) -> i32 {
    if outcome.is_stalled() {
        eprintln!(
            "launch: group of {} stalled; killed ranks {:?}",
            outcome.size, outcome.still_running
        );
        return exit_codes::STALLED;
    }
    let failed = outcome.failed_ranks();
    if !failed.is_empty() {
        eprintln!("launch: ranks {failed:?} exited unsuccessfully");
        return exit_codes::PARTICIPANT_FAILED;
    }
    exit_codes::OK
}

fn cmd_hello(repeat: usize, omit_final_sync: Option<usize>) -> Result<i32> {
    if repeat == 0 {
        bail!("--repeat must be > 0");
    }
    let stdout = io::stdout();
    let mut sink = FlushingSink::new(stdout.lock());
    match GroupEnv::from_env()? {
        Some(env) => {
            let group = SocketGroup::join(&env)?;
            run_passes(&group, repeat, omit_final_sync, &mut sink)?;
        }
        None => {
            let group = LocalGroup::solo();
            run_passes(&group, repeat, omit_final_sync, &mut sink)?;
        }
    }
    Ok(exit_codes::OK)
}

/// Run `repeat` passes; the fault, if any, applies to the last pass only.
fn run_passes<G, K>(
    group: &G,
    repeat: usize,
    omit_final_sync: Option<usize>,
    sink: &mut K,
) -> Result<()>
where
    G: ProcessGroup + ?Sized,
    K: LineSink + ?Sized,
{
    for pass in 0..repeat {
        let options = SequencerOptions {
            omit_final_sync: pass + 1 == repeat && omit_final_sync == Some(group.rank()),
        };
        let report = BarrierSequencer::new(group)
            .with_options(options)
            .run(&HelloScript, sink)
            .with_context(|| format!("pass {pass}"))?;
        debug!(pass, report = ?report, "pass complete");
    }
    Ok(())
}

fn cmd_demo(np: usize, repeat: usize) -> Result<i32> {
    if repeat == 0 {
        bail!("--repeat must be > 0");
    }
    let lines = run_local(np, repeat, &HelloScript)?;
    for line in lines {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_verify(np: usize, repeat: usize, file: Option<&Path>) -> Result<i32> {
    if np == 0 {
        bail!("-n must be > 0");
    }
    if repeat == 0 {
        bail!("--repeat must be > 0");
    }
    let raw = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("read transcript from stdin")?;
            buf
        }
    };
    let lines: Vec<&str> = raw.lines().collect();
    let violations = verify_transcript(&lines, np, repeat, &HelloScript);
    if violations.is_empty() {
        println!("verify: ok ({} lines, {np} ranks, {repeat} passes)", lines.len());
        return Ok(exit_codes::OK);
    }
    eprintln!("verify: observed rank order {:?}", rank_sequence(&lines));
    for violation in violations {
        eprintln!("verify: {violation}");
    }
    Ok(exit_codes::UNORDERED)
}

#[derive(Debug, Serialize)]
struct InfoView {
    mode: &'static str,
    rank: usize,
    size: usize,
    rendezvous: Option<String>,
}

fn cmd_info(json: bool) -> Result<i32> {
    let view = match GroupEnv::from_env()? {
        Some(env) => InfoView {
            mode: "launched",
            rank: env.rank,
            size: env.size,
            rendezvous: Some(env.rendezvous.to_string()),
        },
        None => InfoView {
            mode: "singleton",
            rank: 0,
            size: 1,
            rendezvous: None,
        },
    };
    if json {
        println!(
            "{}",
            serde_json::to_string(&view).context("serialize group view")?
        );
    } else {
        match &view.rendezvous {
            Some(addr) => println!(
                "rank {} of {} (rendezvous {addr})",
                view.rank, view.size
            ),
            None => println!("rank {} of {} ({})", view.rank, view.size, view.mode),
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankline::io::hub::HubReport;

    #[test]
    fn parse_launch_with_program() {
        let cli = Cli::parse_from([
            "rankline",
            "launch",
            "-n",
            "4",
            "--timeout-secs",
            "2",
            "--",
            "prog",
            "--flag",
        ]);
        match cli.command {
            Command::Launch {
                np,
                timeout_secs,
                program,
                config,
                report,
            } => {
                assert_eq!(np, Some(4));
                assert_eq!(timeout_secs, Some(2));
                assert_eq!(program, vec!["prog", "--flag"]);
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_FILE));
                assert!(report.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_hello_defaults() {
        let cli = Cli::parse_from(["rankline", "hello"]);
        assert!(matches!(
            cli.command,
            Command::Hello {
                repeat: 1,
                omit_final_sync: None
            }
        ));
    }

    #[test]
    fn parse_verify_reads_stdin_without_file() {
        let cli = Cli::parse_from(["rankline", "verify", "-n", "3"]);
        assert!(matches!(
            cli.command,
            Command::Verify {
                np: 3,
                repeat: 1,
                file: None
            }
        ));
    }

    #[test]
    fn formation_errors_map_to_their_own_code() {
        let err = anyhow::Error::from(FormationError::EmptyGroup).context("launch");
        assert_eq!(error_exit_code(&err), exit_codes::FORMATION);
        assert_eq!(
            error_exit_code(&anyhow::anyhow!("bad config")),
            exit_codes::INVALID
        );
    }

    #[test]
    fn stalled_outcome_wins_over_failures() {
        let outcome = LaunchOutcome {
            size: 3,
            exit_codes: vec![None, Some(0), None],
            timed_out: true,
            still_running: vec![0, 2],
            hub: HubReport::Stalled {
                epoch: 2,
                departed: vec![1],
                waiting: vec![0, 2],
            },
        };
        assert_eq!(launch_exit_code(&outcome), exit_codes::STALLED);
    }

    #[test]
    fn solo_group_prints_size_then_rank_zero() {
        let group = LocalGroup::solo();
        let mut sink = FlushingSink::new(Vec::new());
        run_passes(&group, 2, None, &mut sink).expect("run");
        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(out, "size 1\nRank 0\nsize 1\nRank 0\n");
    }
}
