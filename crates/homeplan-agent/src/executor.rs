use homeplan_core::{ChatMessage, PlanError, PlanResult, ResponseFormat};
use homeplan_llm::LlmClient;
use tracing::debug;

use crate::parsing::parse_response;
use crate::prompts::EXECUTOR_PROMPT;

/// Carries out one task and returns its result text.
pub trait TaskExecutor {
    fn execute(&self, input: &str) -> PlanResult<String>;
}

/// Executor input: earlier task results as numbered information, then the task.
pub fn executor_input(information: &[String], task: &str) -> String {
    let lines = information
        .iter()
        .enumerate()
        .map(|(index, info)| format!("{}. {info}", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Information:\n{lines}\nTask:\n{task}")
}

/// Default executor: one model call per task.
pub struct ModelTaskExecutor<'a> {
    llm: &'a dyn LlmClient,
    system_prompt: String,
}

impl<'a> ModelTaskExecutor<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self {
            llm,
            system_prompt: EXECUTOR_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

impl TaskExecutor for ModelTaskExecutor<'_> {
    fn execute(&self, input: &str) -> PlanResult<String> {
        let messages = [
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(input),
        ];
        let reply = self.llm.complete(&messages, ResponseFormat::Text)?;
        let result = parse_response(&reply.text)
            .final_answer
            .unwrap_or_else(|| reply.text.trim().to_string());
        if result.is_empty() {
            return Err(PlanError::unparseable("task result", &reply.text));
        }
        debug!(chars = result.len(), "task executed");
        Ok(result)
    }
}
