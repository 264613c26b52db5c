use anyhow::Result;
use homeplan_agent::{PlanOutcome, PlanProposal};
use homeplan_core::{AppConfig, PriorityVariant};
use serde::Serialize;
use serde_json::json;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(keys) = value
        .get_mut("llm")
        .and_then(|llm| llm.get_mut("api_keys"))
        .and_then(|keys| keys.as_array_mut())
    {
        for key in keys.iter_mut() {
            *key = json!("***REDACTED***");
        }
    }
    Ok(value)
}

fn print_task_list(tasks: &[String]) {
    if tasks.is_empty() {
        println!("  (no tasks)");
    }
    for (index, task) in tasks.iter().enumerate() {
        println!("  {}. {task}", index + 1);
    }
}

pub(crate) fn print_proposal(proposal: &PlanProposal) {
    match proposal {
        PlanProposal::Single(tasks) => {
            println!("Plan:");
            print_task_list(tasks);
        }
        PlanProposal::Priority(plans) => {
            for variant in PriorityVariant::ALL {
                println!(
                    "[{}] {} ({})",
                    variant.menu_index(),
                    variant.title(),
                    variant.focus()
                );
                print_task_list(plans.select(variant));
            }
        }
    }
}

pub(crate) fn print_outcome(
    outcome: &PlanOutcome,
    priority: Option<PriorityVariant>,
    json_mode: bool,
) -> Result<()> {
    if json_mode {
        let mut value = serde_json::to_value(outcome)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "plan_type".to_string(),
                json!(priority.map(|variant| variant.plan_type())),
            );
        }
        return print_json(&value);
    }

    match priority {
        Some(variant) => println!("{}:", variant.title()),
        None => println!("Tasks:"),
    }
    for task in &outcome.tasks {
        println!("  {} [{}] {}", task.id, task.status, task.content);
    }
    println!();
    println!("{}", outcome.final_answer);
    Ok(())
}
