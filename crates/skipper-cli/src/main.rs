//! `skipper` binary: flag parsing, credential bootstrap, and wiring of
//! the agent loop. All policy lives in the library crates.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use skipper_agent::{Controller, RunOutcome, Session};
use skipper_core::{Confirm, SafetyConfig};
use skipper_llm::auth::{self, AuthStore};
use skipper_llm::CopilotOracle;
use skipper_observe::Observer;
use skipper_tools::Executor;

#[derive(Parser)]
#[command(
    name = "skipper",
    version,
    about = "Autonomous agent that turns a goal into gated read/exec/write/retrieve/patch steps"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a goal and execute the steps autonomously.
    Run {
        /// Natural-language goal.
        goal: String,
        #[command(flatten)]
        safety: SafetyArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Drive the same primitives through a command prompt.
    Interactive {
        /// Initial goal (can be changed with the `goal` command).
        #[arg(default_value = "")]
        goal: String,
        #[command(flatten)]
        safety: SafetyArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Log in with the device-code flow and store the credential.
    Auth,
}

#[derive(Args)]
struct SafetyArgs {
    /// Allow shell command execution.
    #[arg(long)]
    allow_exec: bool,
    /// Allow file writes and patch application.
    #[arg(long)]
    allow_write: bool,
    /// Step budget for the run.
    #[arg(long, default_value_t = 20)]
    max_steps: usize,
    /// Record every step as skipped without executing anything.
    #[arg(long)]
    dry_run: bool,
    /// Skip side-effecting steps; reads and retrieval still run.
    #[arg(long)]
    simulate: bool,
    /// Prompt before each exec step.
    #[arg(long)]
    confirm_exec: bool,
    /// Prompt before each write or patch step.
    #[arg(long)]
    confirm_write: bool,
    /// Prompt before each read step.
    #[arg(long)]
    confirm_read: bool,
    /// Answer yes to every confirmation prompt.
    #[arg(long, short = 'y')]
    yes: bool,
    /// Only allow steps whose target or content contains one of these
    /// substrings.
    #[arg(long, value_delimiter = ',')]
    whitelist: Vec<String>,
    /// Ask the oracle for a recovery step after failures.
    #[arg(long)]
    reflect: bool,
}

#[derive(Args)]
struct CommonArgs {
    /// Workspace root; file steps are confined to it.
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Write the run log (goal, flags, history) to this path on exit.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Verbose progress on stderr.
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl SafetyArgs {
    fn into_config(self) -> SafetyConfig {
        SafetyConfig {
            allow_exec: self.allow_exec,
            allow_write: self.allow_write,
            max_steps: self.max_steps,
            dry_run: self.dry_run,
            simulate: self.simulate,
            confirm_exec: self.confirm_exec,
            confirm_write: self.confirm_write,
            confirm_read: self.confirm_read,
            yes: self.yes,
            whitelist: self.whitelist,
            reflect: self.reflect,
        }
    }
}

/// Blocking y/n prompt on the controlling terminal.
struct ConsoleConfirm;

impl Confirm for ConsoleConfirm {
    fn confirm(&self, question: &str) -> bool {
        eprintln!("{question}");
        eprint!("confirm? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            goal,
            safety,
            common,
        } => cmd_run(&goal, safety.into_config(), common),
        Commands::Interactive {
            goal,
            safety,
            common,
        } => cmd_interactive(&goal, safety.into_config(), common),
        Commands::Auth => cmd_auth(),
    };
    std::process::exit(code);
}

fn cmd_run(goal: &str, config: SafetyConfig, common: CommonArgs) -> i32 {
    let oracle = match bootstrap_oracle() {
        Ok(oracle) => oracle,
        Err(err) => {
            eprintln!("skipper: {err}");
            return 1;
        }
    };
    let observer = Observer::new(common.log, common.verbose);
    let executor = Executor::new(common.workspace, Box::new(ConsoleConfirm));
    let mut controller = Controller::new(
        goal,
        &oracle,
        executor,
        config,
        observer,
        Box::new(ConsoleConfirm),
    );
    match controller.run() {
        Ok(RunOutcome::Completed) => {
            println!("done: {} step(s) recorded", controller.history().len());
            0
        }
        Ok(RunOutcome::BudgetExhausted) => {
            println!(
                "step budget exhausted after {} step(s)",
                controller.history().len()
            );
            0
        }
        Err(err) => {
            eprintln!("skipper: {err}");
            1
        }
    }
}

fn cmd_interactive(goal: &str, config: SafetyConfig, common: CommonArgs) -> i32 {
    let oracle = match bootstrap_oracle() {
        Ok(oracle) => oracle,
        Err(err) => {
            eprintln!("skipper: {err}");
            return 1;
        }
    };
    let observer = Observer::new(common.log, common.verbose);
    let executor = Executor::new(common.workspace, Box::new(ConsoleConfirm));
    let controller = Controller::new(
        goal,
        &oracle,
        executor,
        config,
        observer,
        Box::new(ConsoleConfirm),
    );
    let mut session = Session::new(controller);
    match session.run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("skipper: {err}");
            1
        }
    }
}

/// Fails before any plan is requested when no credential is available.
fn bootstrap_oracle() -> Result<CopilotOracle> {
    let oracle = CopilotOracle::new()?;
    oracle.check_credential()?;
    Ok(oracle)
}

fn cmd_auth() -> i32 {
    match run_auth_flow() {
        Ok(path) => {
            println!("credential saved to {path}");
            0
        }
        Err(err) => {
            eprintln!("skipper: auth failed: {err}");
            1
        }
    }
}

fn run_auth_flow() -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let grant = auth::request_device_grant(&client)?;
    println!("open {} in your browser", grant.verification_uri);
    println!("enter the code: {}", grant.user_code);
    println!("waiting for approval...");
    let pat = auth::poll_for_pat(&client, &grant)?;
    let store = AuthStore::new();
    store.save_pat(&pat)?;
    Ok(store.pat_path().display().to_string())
}
