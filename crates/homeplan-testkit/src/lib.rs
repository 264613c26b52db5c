//! Test doubles shared by the workspace's integration tests.

mod server;

pub use server::{MockResponse, RecordedRequest, ScriptedServer};

use homeplan_agent::TaskExecutor;
use homeplan_core::{
    ChatMessage, LlmResponse, PlanError, PlanResult, PlanStatus, RegisteredPlan, ResponseFormat,
    StatusSink, Task, TaskId, TaskStatus,
};
use homeplan_llm::LlmClient;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// `LlmClient` that replays canned replies and records every request.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<PlanResult<LlmResponse>>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, ResponseFormat)>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::with_results(
            replies
                .into_iter()
                .map(|text| Ok(LlmResponse::text(text)))
                .collect(),
        )
    }

    pub fn with_results(results: Vec<PlanResult<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(Vec<ChatMessage>, ResponseFormat)> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> PlanResult<LlmResponse> {
        if let Ok(mut guard) = self.requests.lock() {
            guard.push((messages.to_vec(), format));
        }
        let mut guard = self
            .responses
            .lock()
            .map_err(|_| PlanError::upstream(None, "scripted llm mutex poisoned"))?;
        guard
            .pop_front()
            .unwrap_or_else(|| Err(PlanError::upstream(None, "scripted llm exhausted")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCall {
    Register {
        goal_text: String,
        tasks: Vec<String>,
    },
    Plan {
        status: PlanStatus,
        final_text: Option<String>,
    },
    Task {
        id: TaskId,
        content: String,
        status: TaskStatus,
        result: Option<String>,
    },
}

/// `StatusSink` that keeps every call in order.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    pub calls: Vec<StatusCall>,
}

impl RecordingStatusSink {
    pub fn task_calls(&self, status: TaskStatus) -> Vec<&StatusCall> {
        self.calls
            .iter()
            .filter(|call| matches!(call, StatusCall::Task { status: s, .. } if *s == status))
            .collect()
    }

    pub fn plan_calls(&self, status: PlanStatus) -> Vec<&StatusCall> {
        self.calls
            .iter()
            .filter(|call| matches!(call, StatusCall::Plan { status: s, .. } if *s == status))
            .collect()
    }

    /// Task contents, in call order, that were reported with `status`.
    pub fn task_contents(&self, status: TaskStatus) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StatusCall::Task {
                    content, status: s, ..
                } if *s == status => Some(content.clone()),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingStatusSink {
    fn register_plan(&mut self, goal_text: &str, tasks: &[Task]) -> Option<RegisteredPlan> {
        self.calls.push(StatusCall::Register {
            goal_text: goal_text.to_string(),
            tasks: tasks.iter().map(|task| task.content.clone()).collect(),
        });
        Some(RegisteredPlan {
            plan_id: "plan-1".to_string(),
            task_ids: tasks
                .iter()
                .map(|task| (task.id, format!("task-{}", task.id.0 + 1)))
                .collect::<BTreeMap<_, _>>(),
        })
    }

    fn update_plan_status(&mut self, status: PlanStatus, final_text: Option<&str>) {
        self.calls.push(StatusCall::Plan {
            status,
            final_text: final_text.map(str::to_string),
        });
    }

    fn update_task_status(&mut self, task: &Task, status: TaskStatus, result: Option<&str>) {
        self.calls.push(StatusCall::Task {
            id: task.id,
            content: task.content.clone(),
            status,
            result: result.map(str::to_string),
        });
    }
}

/// `TaskExecutor` that answers each task from a script and records its inputs.
pub struct ScriptedExecutor {
    outputs: Mutex<VecDeque<PlanResult<String>>>,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outputs: Vec<&str>) -> Self {
        Self::with_results(outputs.into_iter().map(|o| Ok(o.to_string())).collect())
    }

    pub fn with_results(results: Vec<PlanResult<String>>) -> Self {
        Self {
            outputs: Mutex::new(results.into()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl TaskExecutor for ScriptedExecutor {
    fn execute(&self, input: &str) -> PlanResult<String> {
        if let Ok(mut guard) = self.inputs.lock() {
            guard.push(input.to_string());
        }
        let mut guard = self
            .outputs
            .lock()
            .map_err(|_| PlanError::Executor("scripted executor mutex poisoned".to_string()))?;
        guard
            .pop_front()
            .unwrap_or_else(|| Err(PlanError::Executor("scripted executor exhausted".to_string())))
    }
}

/// Model reply restating plan progress in the reconcile tag format.
pub fn progress_reply(pending: &[&str], completed: &[&str]) -> String {
    let list = |items: &[&str]| {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {item}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "<pending>\n{}\n</pending>\n<completed>\n{}\n</completed>",
        list(pending),
        list(completed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_llm_replays_in_order_then_fails() {
        let llm = ScriptedLlm::new(vec!["one", "two"]);
        let msgs = [ChatMessage::user("hi")];
        assert_eq!(llm.complete(&msgs, ResponseFormat::Text).expect("one").text, "one");
        assert_eq!(llm.complete(&msgs, ResponseFormat::Json).expect("two").text, "two");
        assert!(llm.complete(&msgs, ResponseFormat::Text).is_err());
        assert_eq!(llm.requests().len(), 3);
        assert_eq!(llm.requests()[1].1, ResponseFormat::Json);
    }

    #[test]
    fn recording_sink_assigns_ids_per_task() {
        let mut sink = RecordingStatusSink::default();
        let tasks = vec![Task::new(TaskId(0), "a"), Task::new(TaskId(1), "a")];
        let registered = sink.register_plan("goal", &tasks).expect("registered");
        assert_eq!(registered.task_ids.len(), 2);
        sink.update_task_status(&tasks[1], TaskStatus::Completed, Some("ok"));
        assert_eq!(sink.task_calls(TaskStatus::Completed).len(), 1);
    }

    #[test]
    fn progress_reply_numbers_each_list() {
        let reply = progress_reply(&["turn on AC"], &["check lights"]);
        assert!(reply.contains("<pending>\n1. turn on AC\n</pending>"));
        assert!(reply.contains("<completed>\n1. check lights\n</completed>"));
    }
}
