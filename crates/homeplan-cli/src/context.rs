use anyhow::Result;
use homeplan_agent::PriorityPlans;
use homeplan_core::{AppConfig, PriorityVariant};
use homeplan_llm::ChatClient;
use std::io::{BufRead, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Merged config and an invoker built from it.
pub(crate) fn load_client(cwd: &Path) -> Result<(AppConfig, ChatClient)> {
    let cfg = AppConfig::ensure(cwd)?;
    let client = ChatClient::new(cfg.llm.clone())?;
    debug!(
        model = %cfg.llm.model,
        credentials = client.credential_count(),
        "llm client ready"
    );
    Ok((cfg, client))
}

fn read_answer() -> Option<String> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Clarifier for the advanced planner: question on stderr, answer from stdin.
pub(crate) fn ask_on_stdin(question: &str) -> Option<String> {
    eprintln!("{question}");
    eprint!("> ");
    let _ = std::io::stderr().flush();
    read_answer().filter(|answer| !answer.is_empty())
}

/// Interactive 1-3 menu. EOF or an empty line picks `default`.
pub(crate) fn choose_priority(plans: &PriorityPlans, default: PriorityVariant) -> PriorityVariant {
    for variant in PriorityVariant::ALL {
        eprintln!(
            "{}. {} ({}, {} tasks)",
            variant.menu_index(),
            variant.title(),
            variant.focus(),
            plans.select(variant).len()
        );
    }
    loop {
        eprint!("Choose a plan [1-3, default {}]: ", default.menu_index());
        let _ = std::io::stderr().flush();
        let Some(answer) = read_answer() else {
            return default;
        };
        if answer.is_empty() {
            return default;
        }
        match PriorityVariant::from_str(&answer) {
            Ok(variant) => return variant,
            Err(err) => eprintln!("{err}"),
        }
    }
}
