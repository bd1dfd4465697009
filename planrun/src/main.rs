//! Test-plan pipeline runner.
//!
//! Runs each plan through discover, provision, prepare, execute, finish,
//! report, and cleanup on the local host, optionally opening an interactive
//! login session at the points selected by `login`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use planrun::core::evaluator::LoginError;
use planrun::core::trigger::{TriggerError, TriggerSpec};
use planrun::core::types::PhaseName;
use planrun::exit_codes;
use planrun::io::local::LocalDriver;
use planrun::io::plan::load_plan;
use planrun::io::session::ShellSession;
use planrun::logging;
use planrun::pipeline::{LoginOptions, PlanOutcome, PlanRequest};
use planrun::plans::{PlanJob, run_plans};

const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Parser)]
#[command(
    name = "planrun",
    version,
    about = "Run test plans through a fixed phase pipeline"
)]
struct Cli {
    /// Log progress at info level (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more plans.
    Run(RunArgs),
    /// Print the phase sequence and which phases have a guest.
    Phases,
}

#[derive(Args)]
struct RunArgs {
    /// Plan file (TOML). Repeat to run several plans.
    #[arg(short, long = "plan", required = true)]
    plans: Vec<PathBuf>,

    /// Run only these phases (repeatable). Defaults to all.
    #[arg(long = "phase", value_name = "PHASE")]
    phases: Vec<String>,

    /// Number of plans to run concurrently.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Directory for test logs and results.
    #[arg(long, default_value = ".planrun")]
    workdir: PathBuf,

    #[command(subcommand)]
    action: Option<RunAction>,
}

#[derive(Subcommand)]
enum RunAction {
    /// Open an interactive session on the guest during the run.
    Login(LoginArgs),
}

#[derive(Args)]
struct LoginArgs {
    /// Log in after each test in `execute`.
    #[arg(short = 't', long = "test")]
    per_test: bool,

    /// Only log in when a result matches (repeatable, any match fires).
    #[arg(long, value_name = "RESULT")]
    when: Vec<String>,

    /// Log in at the end of this phase (repeatable).
    #[arg(long = "step", value_name = "PHASE")]
    steps: Vec<String>,

    /// Run this command instead of an interactive shell.
    #[arg(short, long)]
    command: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Phases => {
            cmd_phases();
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let enabled = enabled_phases(&args.phases)?;
    let login = match args.action {
        Some(RunAction::Login(login)) => Some(LoginOptions {
            trigger: TriggerSpec::from_args(login.per_test, &login.when, &login.steps)?,
            command: login.command,
        }),
        None => None,
    };

    let mut jobs = Vec::with_capacity(args.plans.len());
    let mut plan_dirs: BTreeMap<PathBuf, &PathBuf> = BTreeMap::new();
    for path in &args.plans {
        let plan = load_plan(path)?;
        let request = PlanRequest {
            plan: plan.plan.name.clone(),
            enabled: enabled.clone(),
            login: login.clone(),
        };
        let driver = LocalDriver::new(plan, &args.workdir)
            .with_context(|| format!("set up plan {}", path.display()))?;
        if let Some(other) = plan_dirs.insert(driver.plan_dir().to_path_buf(), path) {
            bail!(
                "plans {} and {} both write to {}; give one a distinct [plan] name",
                other.display(),
                path.display(),
                driver.plan_dir().display()
            );
        }
        jobs.push(PlanJob { driver, request });
    }

    let invoker = ShellSession::new(DEFAULT_SHELL);
    let results = run_plans(jobs, &invoker, args.jobs)?;

    let mut codes = Vec::with_capacity(results.len());
    for result in results {
        match result.result {
            Ok(outcome) => {
                print_summary(&outcome);
                codes.push(exit_codes::for_outcome(&outcome));
            }
            Err(err) => {
                println!("plan: name={} status=error", result.plan);
                report_error(&err);
                codes.push(exit_codes::ERROR);
            }
        }
    }
    Ok(exit_codes::combine(codes))
}

fn cmd_phases() {
    for phase in PhaseName::ALL {
        let guest = if phase.is_guestless() { "guestless" } else { "guest" };
        println!("{phase}\t{guest}");
    }
}

fn enabled_phases(values: &[String]) -> Result<BTreeSet<PhaseName>, TriggerError> {
    if values.is_empty() {
        return Ok(PhaseName::ALL.into_iter().collect());
    }
    values.iter().map(|value| value.trim().parse()).collect()
}

fn print_summary(outcome: &PlanOutcome) {
    let overall = outcome
        .ledger
        .overall()
        .map_or("none", |kind| kind.as_str());
    println!(
        "plan: name={} status={:?} tests={} result={} logins={}",
        outcome.plan,
        outcome.status,
        outcome.ledger.len(),
        overall,
        outcome.firings.len()
    );
    for failure in &outcome.session_failures {
        eprintln!(
            "warning: plan {} login at {} failed: {}",
            outcome.plan, failure.phase, failure.reason
        );
    }
    for phase in &outcome.rejected {
        eprintln!(
            "error: plan {} login at {phase}: No guests ready for login",
            outcome.plan
        );
    }
}

fn report_error(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
    if err.downcast_ref::<LoginError>().is_some() {
        eprintln!(
            "hint: login needs a provisioned guest; enable provision and target a phase between prepare and report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_login() {
        let cli = Cli::parse_from([
            "planrun", "run", "--plan", "a.toml", "--plan", "b.toml", "login", "-t", "--when",
            "fail", "--when", "error", "--step", "finish",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.plans.len(), 2);
        let Some(RunAction::Login(login)) = args.action else {
            panic!("expected login");
        };
        assert!(login.per_test);
        assert_eq!(login.when, vec!["fail", "error"]);
        assert_eq!(login.steps, vec!["finish"]);
        assert_eq!(login.command, None);
    }

    #[test]
    fn parse_run_without_login() {
        let cli = Cli::parse_from(["planrun", "run", "-p", "a.toml", "--phase", "discover"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.action.is_none());
        assert_eq!(args.phases, vec!["discover"]);
        assert_eq!(args.jobs, 1);
    }

    #[test]
    fn enabled_phases_default_to_all() {
        let enabled = enabled_phases(&[]).expect("phases");
        assert_eq!(enabled.len(), PhaseName::ALL.len());
    }

    #[test]
    fn enabled_phases_reject_unknown_names() {
        let err = enabled_phases(&["deploy".to_string()]).unwrap_err();
        assert!(matches!(err, TriggerError::UnknownPhase { .. }));
    }
}
