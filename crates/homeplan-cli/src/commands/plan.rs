use anyhow::{Result, anyhow};
use homeplan_agent::{ModelTaskExecutor, PlanMachine, PlanOutcome, PlanProposal, Planner};
use homeplan_core::{AppConfig, PriorityVariant};
use homeplan_llm::ChatClient;
use homeplan_observe::status_sink;
use serde_json::json;
use std::path::Path;
use tracing::info;

use crate::context::{ask_on_stdin, choose_priority, load_client};
use crate::output::{print_json, print_outcome, print_proposal};
use crate::{ExecuteArgs, PlanArgs, RunArgs};

pub(crate) fn run_plan(cwd: &Path, args: PlanArgs, json_mode: bool) -> Result<()> {
    let (cfg, client) = load_client(cwd)?;
    let strategy = args.strategy.unwrap_or(cfg.planner.strategy);
    let proposal = Planner::new(&client, &cfg.planner).propose(
        strategy,
        &args.request,
        &mut ask_on_stdin,
    )?;

    if json_mode {
        print_json(&json!({
            "request": args.request,
            "strategy": strategy,
            "proposal": proposal,
        }))?;
    } else {
        print_proposal(&proposal);
    }
    Ok(())
}

pub(crate) fn run_request(cwd: &Path, args: RunArgs, json_mode: bool) -> Result<()> {
    let (mut cfg, client) = load_client(cwd)?;
    if args.no_status {
        cfg.status.enabled = false;
    }
    let strategy = args.strategy.unwrap_or(cfg.planner.strategy);
    let proposal = Planner::new(&client, &cfg.planner).propose(
        strategy,
        &args.request,
        &mut ask_on_stdin,
    )?;

    let (tasks, priority) = match &proposal {
        PlanProposal::Single(tasks) => (tasks.clone(), None),
        PlanProposal::Priority(plans) => {
            let variant = match args.priority {
                Some(variant) => variant,
                None if json_mode => cfg.planner.default_priority,
                None => choose_priority(plans, cfg.planner.default_priority),
            };
            let tasks = plans.select(variant).to_vec();
            if tasks.is_empty() {
                return Err(anyhow!(
                    "the {variant} plan has no tasks; choose another with --priority"
                ));
            }
            (tasks, Some(variant))
        }
    };
    info!(%strategy, priority = ?priority, tasks = tasks.len(), "executing plan");

    let outcome = execute_plan(&client, &cfg, &args.request, tasks, priority)?;
    print_outcome(&outcome, priority, json_mode)
}

pub(crate) fn run_execute(cwd: &Path, args: ExecuteArgs, json_mode: bool) -> Result<()> {
    let (mut cfg, client) = load_client(cwd)?;
    if args.no_status {
        cfg.status.enabled = false;
    }
    let goal = args.goal.unwrap_or_else(|| args.tasks.join("; "));
    let outcome = execute_plan(&client, &cfg, &goal, args.tasks, None)?;
    print_outcome(&outcome, None, json_mode)
}

fn execute_plan(
    client: &ChatClient,
    cfg: &AppConfig,
    goal: &str,
    tasks: Vec<String>,
    priority: Option<PriorityVariant>,
) -> Result<PlanOutcome> {
    let mut status = status_sink(&cfg.status, priority);
    let executor = ModelTaskExecutor::new(client);
    let machine = PlanMachine::new(client, &executor, status.as_mut(), cfg.execution.clone());
    Ok(machine.run(goal, tasks)?)
}
