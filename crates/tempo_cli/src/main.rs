//! Command-line driver: parse a network, run a checker, report the
//! status and optionally write the resulting network back out.
//!
//! The exit code is 0 whenever a check ran to a verdict, including "not
//! controllable" (the verdict lives in the report and the output file).
//! Only I/O problems and malformed inputs exit non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tempo_core::Deadline;
use tempo_io::{read_graphml, write_graphml};
use tempo_net::cstn::{self, CstnOptions};
use tempo_net::stnu::{CheckOptions, StnuAlg, dc_check};
use tempo_net::{CheckStatus, NetGraph};

#[derive(Parser)]
#[command(
    name = "tempo",
    version,
    about = "Dynamic-controllability checking for temporal networks"
)]
struct Cli {
    /// Input network (GraphML)
    input: PathBuf,

    /// Write the checked (and possibly minimized) network here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Algorithm: Morris2014, Morris2014Dispatchable, RUL2018, RUL2021,
    /// FD_STNU, FD_STNU_IMPROVED, SRNCycleFinder or CSTN
    #[arg(short, long, default_value = "RUL2021")]
    algorithm: String,

    /// Drop edges left without values before writing the output
    #[arg(long)]
    clean: bool,

    /// Print the status metadata as JSON on stdout
    #[arg(long)]
    save: bool,

    /// Also record contingent bounds as ordinary constraints
    #[arg(long)]
    contingent_also_as_ordinary: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let mut g = read_graphml(&text).context("parsing the input network")?;

    let deadline = match cli.timeout {
        Some(secs) => Deadline::within(Duration::from_secs(secs)),
        None => Deadline::unbounded(),
    };
    let status = check(&mut g, &cli, deadline)?;

    eprint!("{}", status.render(&g));
    if cli.save {
        println!("{}", serde_json::to_string_pretty(&status_json(&status, &g))?);
    }
    if let Some(out) = &cli.output {
        if cli.clean {
            g.clean_empty_edges();
        }
        let rendered = write_graphml(&g).context("rendering the output network")?;
        std::fs::write(out, rendered).with_context(|| format!("writing {}", out.display()))?;
    }
    Ok(())
}

fn check(g: &mut NetGraph, cli: &Cli, deadline: Deadline) -> Result<CheckStatus> {
    if cli.algorithm.eq_ignore_ascii_case("CSTN") {
        return cstn::dc_check(g, &CstnOptions { deadline }).map_err(Into::into);
    }
    let alg: StnuAlg = cli
        .algorithm
        .parse()
        .with_context(|| format!("selecting algorithm {:?}", cli.algorithm))?;
    dc_check(
        g,
        alg,
        &CheckOptions {
            deadline,
            contingent_also_as_ordinary: cli.contingent_also_as_ordinary,
        },
    )
    .map_err(Into::into)
}

fn status_json(status: &CheckStatus, g: &NetGraph) -> serde_json::Value {
    let witness = status.witness.as_ref().map(|w| {
        serde_json::json!({
            "kind": w.kind.to_string(),
            "value": w.value,
            "edges": w.edges
                .iter()
                .filter_map(|k| g.edge(*k).map(|e| e.name().to_string()))
                .collect::<Vec<_>>(),
        })
    });
    let r = &status.rules;
    serde_json::json!({
        "algorithm": status.algorithm,
        "verdict": status.verdict_text(),
        "finished": status.finished,
        "timeout": status.timeout,
        "cycles": status.cycles,
        "rules": {
            "relax": r.relax,
            "lower": r.lower,
            "upper": r.upper,
            "waits": r.waits,
            "potential_updates": r.potential_updates,
            "lp": r.lp, "qlp": r.qlp,
            "r0": r.r0, "qr0": r.qr0,
            "r3": r.r3, "qr3": r.qr3,
        },
        "elapsed_seconds": status.execution_time.map(|t| t.as_secs_f64()),
        "witness": witness,
    })
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
