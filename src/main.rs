use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use chartlens::config::{self, EVAL_LOAD_DOTENV};
use chartlens::eval::report::{render_quiet, render_summary};
use chartlens::eval::{load_manifest, EvalError, EvalOptions, EvalRunner, JsonPayload, ModeReport};
use chartlens::models::{AnalysisMode, JsonChartSource};

/// Score the analysis pipeline against a seeded evaluation manifest.
#[derive(Parser, Debug)]
#[command(name = "chartlens-eval", version)]
struct Args {
    /// Path to the eval manifest JSON.
    #[arg(long, default_value = "eval/manifest.json")]
    manifest: PathBuf,

    /// Comma-separated modes to run (e.g. mock,llm).
    #[arg(long, default_value = "mock")]
    modes: String,

    /// Per-patient timeout for model mode.
    #[arg(long, default_value_t = 60)]
    llm_timeout_seconds: u64,

    /// Retries for transient model failures.
    #[arg(long, default_value_t = 1)]
    llm_retries: u32,

    /// Fail patients whose model evaluation was skipped.
    #[arg(long)]
    require_llm: bool,

    /// Only print the overall result and failures.
    #[arg(long)]
    quiet: bool,

    /// Print a JSON summary to stdout.
    #[arg(long)]
    json: bool,

    /// Exit non-zero if any patient failed.
    #[arg(long)]
    fail_on_warn: bool,
}

fn parse_modes(raw: &str) -> Result<Vec<AnalysisMode>, EvalError> {
    let modes = raw
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| m.parse::<AnalysisMode>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(if modes.is_empty() { vec![AnalysisMode::Mock] } else { modes })
}

fn run(args: &Args) -> Result<Vec<ModeReport>, EvalError> {
    let modes = parse_modes(&args.modes)?;
    let manifest = load_manifest(&args.manifest)?;
    let runner = EvalRunner::new(Arc::new(JsonChartSource));

    modes
        .into_iter()
        .map(|mode| {
            let options = EvalOptions {
                mode: Some(mode),
                require_llm: args.require_llm,
                llm_timeout: Duration::from_secs(args.llm_timeout_seconds),
                llm_retries: args.llm_retries,
                ..Default::default()
            };
            runner.evaluate(&manifest, &options)
        })
        .collect()
}

fn main() -> ExitCode {
    let dotenv = (std::env::var(EVAL_LOAD_DOTENV).as_deref() == Ok("1")).then(dotenvy::dotenv);
    chartlens::init_tracing();
    match dotenv {
        Some(Ok(path)) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Some(Err(e)) => tracing::warn!(error = %e, "Could not load .env"),
        None => {}
    }

    let args = Args::parse();
    tracing::debug!(version = config::APP_VERSION, manifest = %args.manifest.display(), "Starting evaluation");

    let reports = match run(&args) {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("manifest_error: {e}");
            return ExitCode::from(2);
        }
    };

    if args.json {
        match JsonPayload::build(&reports, args.require_llm).to_sorted_json() {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if args.quiet {
        for report in &reports {
            if reports.len() > 1 {
                println!("mode: {}", report.mode);
            }
            print!("{}", render_quiet(report));
        }
    } else {
        for report in &reports {
            print!("{}", render_summary(report));
            if reports.len() > 1 {
                println!();
            }
        }
    }

    let overall_pass = reports.iter().all(|r| r.overall_pass);
    let patients_failed: usize = reports.iter().map(|r| r.patients_failed).sum();
    if args.fail_on_warn && patients_failed > 0 {
        return ExitCode::FAILURE;
    }
    if overall_pass {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
