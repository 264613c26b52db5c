use chrono::{DateTime, Utc};
use homeplan_core::{
    ChatMessage, ExecutionConfig, PlanError, PlanResult, PlanStatus, RESULT_TRUNCATION_MARKER,
    ResponseFormat, StatusSink, Task, TaskId, TaskStatus, truncate_with_marker,
};
use homeplan_llm::LlmClient;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::executor::{TaskExecutor, executor_input};
use crate::parsing::parse_response;
use crate::prompts::{FINALIZE_REQUEST, RECONCILE_PROMPT};
use crate::transcript::Transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Initialize,
    ExecuteTask,
    Reconcile,
    Finalize,
    Done,
    /// Terminal after any step error; further steps are refused.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub goal: String,
    pub final_answer: String,
    pub tasks: Vec<Task>,
    pub executions: usize,
    pub plan_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one plan: `Initialize -> ExecuteTask -> Reconcile -> (ExecuteTask | Finalize) -> Done`.
///
/// Tasks are addressed by ordinal [`TaskId`]; the model's restated task text
/// is mapped back to ids during reconciliation. A task reported completed is
/// never reported again and never returns to pending.
pub struct PlanMachine<'a> {
    llm: &'a dyn LlmClient,
    executor: &'a dyn TaskExecutor,
    status: &'a mut dyn StatusSink,
    cfg: ExecutionConfig,
    state: PlanState,
    goal: String,
    tasks: Vec<Task>,
    pending: Vec<TaskId>,
    reported_completed: BTreeSet<TaskId>,
    information: Vec<String>,
    transcript: Transcript,
    plan_status: PlanStatus,
    plan_id: Option<String>,
    executions: usize,
    final_answer: Option<String>,
    started_at: DateTime<Utc>,
}

impl<'a> PlanMachine<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        executor: &'a dyn TaskExecutor,
        status: &'a mut dyn StatusSink,
        cfg: ExecutionConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            status,
            cfg,
            state: PlanState::Initialize,
            goal: String::new(),
            tasks: Vec::new(),
            pending: Vec::new(),
            reported_completed: BTreeSet::new(),
            information: Vec::new(),
            transcript: Transcript::new(RECONCILE_PROMPT),
            plan_status: PlanStatus::Draft,
            plan_id: None,
            executions: 0,
            final_answer: None,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn plan_status(&self) -> PlanStatus {
        self.plan_status
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task to execute next: the head of pending.
    pub fn current(&self) -> Option<&Task> {
        self.pending.first().map(|id| &self.tasks[id.0])
    }

    pub fn pending(&self) -> Vec<&Task> {
        self.pending.iter().map(|id| &self.tasks[id.0]).collect()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Register the plan, report every task pending and the plan in progress.
    pub fn initialize(&mut self, goal: &str, plan: Vec<String>) -> PlanResult<()> {
        if self.state != PlanState::Initialize {
            return Err(PlanError::Config("plan machine is already initialized".into()));
        }
        self.goal = goal.to_string();
        self.tasks = plan
            .into_iter()
            .map(|task| task.trim().to_string())
            .filter(|task| !task.is_empty())
            .enumerate()
            .map(|(index, content)| Task::new(TaskId(index), content))
            .collect();
        self.pending = self.tasks.iter().map(|task| task.id).collect();

        self.plan_id = self
            .status
            .register_plan(goal, &self.tasks)
            .map(|registered| registered.plan_id);
        self.plan_status = PlanStatus::PlanCreated;
        for task in &self.tasks {
            self.status
                .update_task_status(task, TaskStatus::Pending, None);
        }
        self.plan_status = PlanStatus::InProgress;
        self.status.update_plan_status(PlanStatus::InProgress, None);

        self.state = if self.pending.is_empty() {
            PlanState::Finalize
        } else {
            PlanState::ExecuteTask
        };
        info!(
            tasks = self.tasks.len(),
            plan_id = self.plan_id.as_deref().unwrap_or("-"),
            "plan initialized"
        );
        Ok(())
    }

    /// Run the current state and return the next one.
    ///
    /// Any error is mirrored as a failed plan before it is returned, and the
    /// machine stays in [`PlanState::Failed`].
    pub fn step(&mut self) -> PlanResult<PlanState> {
        let result = match self.state {
            PlanState::Initialize => {
                return Err(PlanError::Config(
                    "plan machine must be initialized before stepping".into(),
                ));
            }
            PlanState::Failed => {
                return Err(PlanError::Config("plan has already failed".into()));
            }
            PlanState::ExecuteTask => self.execute_task(),
            PlanState::Reconcile => self.reconcile(),
            PlanState::Finalize => self.finalize(),
            PlanState::Done => Ok(()),
        };
        if let Err(err) = result {
            self.mirror_failure(&err);
            self.state = PlanState::Failed;
            return Err(err);
        }
        Ok(self.state)
    }

    pub fn run(mut self, goal: &str, plan: Vec<String>) -> PlanResult<PlanOutcome> {
        self.initialize(goal, plan)?;
        while self.state != PlanState::Done {
            self.step()?;
        }
        Ok(PlanOutcome {
            goal: self.goal,
            final_answer: self.final_answer.unwrap_or_default(),
            tasks: self.tasks,
            executions: self.executions,
            plan_id: self.plan_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
        })
    }

    fn execute_task(&mut self) -> PlanResult<()> {
        let Some(id) = self.pending.first().copied() else {
            self.state = PlanState::Finalize;
            return Ok(());
        };
        if self.executions >= self.cfg.max_iterations {
            return Err(PlanError::IterationLimit(self.cfg.max_iterations));
        }
        self.executions += 1;
        let content = self.tasks[id.0].content.clone();
        info!(task = %id, execution = self.executions, %content, "executing task");

        self.set_task_status(id, TaskStatus::InProgress, None);
        let input = executor_input(&self.information, &content);
        let output = match self.executor.execute(&input) {
            Ok(output) => output,
            Err(err) => {
                self.set_task_status(id, TaskStatus::Failed, Some(&err.to_string()));
                return Err(err);
            }
        };

        let result = truncate_with_marker(&output, self.cfg.max_result_chars, RESULT_TRUNCATION_MARKER);
        self.tasks[id.0].result = Some(result.clone());
        self.set_task_status(id, TaskStatus::Completed, Some(&result));
        self.reported_completed.insert(id);
        self.pending.retain(|pending| *pending != id);

        self.transcript.push(ChatMessage::user(format!(
            "Plan:\n{}\nTask:\n{content}\nTask Response:\n{result}",
            self.numbered_plan()
        )));
        self.information.push(result);
        self.state = PlanState::Reconcile;
        Ok(())
    }

    fn reconcile(&mut self) -> PlanResult<()> {
        let messages = self.transcript.trimmed(self.cfg.transcript_max_chars);
        let reply = self.llm.complete(&messages, ResponseFormat::Text)?;
        let parsed = parse_response(&reply.text);
        if parsed.pending.is_none() && parsed.completed.is_none() {
            return Err(PlanError::unparseable(
                "<pending>/<completed> task lists",
                &reply.text,
            ));
        }
        self.transcript.push(ChatMessage::assistant(reply.text.as_str()));

        let mut claimed = BTreeSet::new();
        for text in parsed.completed.unwrap_or_default() {
            let Some(id) = self.resolve(&text, &claimed, true) else {
                debug!(task = %text, "completed task is not part of the plan; ignoring");
                continue;
            };
            claimed.insert(id);
            if self.reported_completed.insert(id) {
                let result = self.tasks[id.0]
                    .result
                    .clone()
                    .unwrap_or_else(|| format!("Task '{}' completed", self.tasks[id.0].content));
                self.set_task_status(id, TaskStatus::Completed, Some(&result));
            }
        }

        let mut pending = Vec::new();
        for text in parsed.pending.unwrap_or_default() {
            let id = match self.resolve(&text, &claimed, false) {
                Some(id) => id,
                None => {
                    let id = TaskId(self.tasks.len());
                    info!(task = %id, content = %text, "model added a task");
                    self.tasks.push(Task::new(id, text));
                    self.set_task_status(id, TaskStatus::Pending, None);
                    id
                }
            };
            claimed.insert(id);
            if self.reported_completed.contains(&id) {
                debug!(task = %id, "already completed; not re-queued");
                continue;
            }
            pending.push(id);
        }
        self.pending = pending;

        if self.pending.is_empty() {
            self.plan_status = PlanStatus::Completed;
            self.state = PlanState::Finalize;
        } else {
            if self.plan_status != PlanStatus::InProgress {
                self.status.update_plan_status(PlanStatus::InProgress, None);
            }
            self.plan_status = PlanStatus::InProgress;
            self.state = PlanState::ExecuteTask;
        }
        debug!(
            pending = self.pending.len(),
            completed = self.reported_completed.len(),
            "plan reconciled"
        );
        Ok(())
    }

    fn finalize(&mut self) -> PlanResult<()> {
        let mut messages = self.transcript.trimmed(self.cfg.transcript_max_chars);
        messages.push(ChatMessage::user(FINALIZE_REQUEST));
        let reply = self.llm.complete(&messages, ResponseFormat::Text)?;
        let answer = parse_response(&reply.text)
            .final_answer
            .filter(|answer| !answer.is_empty())
            .ok_or_else(|| PlanError::unparseable("<final-answer>", &reply.text))?;

        self.transcript.push(ChatMessage::user(FINALIZE_REQUEST));
        self.transcript.push(ChatMessage::assistant(reply.text));
        self.plan_status = PlanStatus::Completed;
        self.status
            .update_plan_status(PlanStatus::Completed, Some(&answer));
        info!(executions = self.executions, "plan completed");
        self.final_answer = Some(answer);
        self.state = PlanState::Done;
        Ok(())
    }

    fn set_task_status(&mut self, id: TaskId, status: TaskStatus, result: Option<&str>) {
        self.tasks[id.0].status = status;
        self.status.update_task_status(&self.tasks[id.0], status, result);
    }

    fn mirror_failure(&mut self, err: &PlanError) {
        if self.plan_status == PlanStatus::Failed {
            return;
        }
        warn!(error = %err, state = ?self.state, "plan failed");
        self.plan_status = PlanStatus::Failed;
        self.status
            .update_plan_status(PlanStatus::Failed, Some(&err.to_string()));
    }

    /// Match restated task text to an unclaimed task, preferring tasks whose
    /// completion state agrees with the list the text came from.
    fn resolve(&self, text: &str, claimed: &BTreeSet<TaskId>, completed: bool) -> Option<TaskId> {
        let key = normalize(text);
        let candidates: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| !claimed.contains(&task.id) && normalize(&task.content) == key)
            .collect();
        candidates
            .iter()
            .find(|task| self.reported_completed.contains(&task.id) == completed)
            .or_else(|| candidates.first())
            .map(|task| task.id)
    }

    fn numbered_plan(&self) -> String {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, task)| format!("{}. {}", index + 1, task.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ignores_case_and_spacing() {
        assert_eq!(normalize("  Turn  on\tAC "), "turn on ac");
    }
}
