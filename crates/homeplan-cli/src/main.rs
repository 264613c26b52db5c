use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use homeplan_core::{PlanStrategy, PriorityVariant};
use std::path::PathBuf;

mod commands;
mod context;
mod output;

use commands::config::run_config;
use commands::plan::{run_execute, run_plan, run_request};

#[derive(Parser)]
#[command(name = "homeplan")]
#[command(about = "Plan and carry out smart-home requests with an LLM", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Directory whose `.homeplan/` settings apply. Defaults to the current directory.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propose a plan for a request without executing it.
    Plan(PlanArgs),
    /// Propose a plan, pick a variant and execute it.
    Run(RunArgs),
    /// Execute an explicit task list.
    Execute(ExecuteArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Args)]
struct PlanArgs {
    request: String,
    /// simple, advanced or priority. Overrides `planner.strategy`.
    #[arg(long)]
    strategy: Option<PlanStrategy>,
}

#[derive(Args)]
struct RunArgs {
    request: String,
    #[arg(long)]
    strategy: Option<PlanStrategy>,
    /// Priority plan to execute: 1-3 or security, convenience, energy.
    #[arg(long)]
    priority: Option<PriorityVariant>,
    /// Do not mirror progress to the status service.
    #[arg(long = "no-status")]
    no_status: bool,
}

#[derive(Args)]
struct ExecuteArgs {
    /// Task to run, in order (repeatable).
    #[arg(long = "task", required = true)]
    tasks: Vec<String>,
    /// Goal text reported with the plan. Defaults to the joined task list.
    #[arg(long)]
    goal: Option<String>,
    #[arg(long = "no-status")]
    no_status: bool,
}

#[derive(Subcommand)]
enum ConfigCmd {
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    homeplan_observe::init_logging(cli.verbose);
    let cwd = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Plan(args) => run_plan(&cwd, args, cli.json),
        Commands::Run(args) => run_request(&cwd, args, cli.json),
        Commands::Execute(args) => run_execute(&cwd, args, cli.json),
        Commands::Config { command } => run_config(&cwd, command, cli.json),
    }
}
