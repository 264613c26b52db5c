use homeplan_core::{
    PlanError, PlanResult, PlanStatus, PriorityVariant, RegisteredPlan, StatusConfig, StatusSink,
    Task, TaskId, TaskStatus,
};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const TITLE_MAX_CHARS: usize = 100;

/// Mirrors plan and task transitions to the status service over HTTP.
///
/// Every call is a single blocking attempt. Failures are logged and dropped so
/// plan execution never depends on the service being reachable.
pub struct StatusReporter {
    base_url: String,
    client: Client,
    session_id: String,
    trigger: String,
    max_retries: u32,
    priority: Option<PriorityVariant>,
    registered: Option<RegisteredPlan>,
}

impl StatusReporter {
    pub fn new(cfg: &StatusConfig) -> PlanResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .map_err(|err| PlanError::Config(format!("failed to build status client: {err}")))?;
        Ok(Self {
            base_url: cfg.resolve_base_url(),
            client,
            session_id: cfg.resolve_session_id(),
            trigger: cfg.trigger.clone(),
            max_retries: cfg.max_retries,
            priority: None,
            registered: None,
        })
    }

    pub fn with_priority(mut self, priority: PriorityVariant) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn plan_id(&self) -> Option<&str> {
        self.registered.as_ref().map(|r| r.plan_id.as_str())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn send(&self, method: reqwest::Method, path: &str, body: &Value) -> PlanResult<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .request(method.clone(), &url)
            .json(body)
            .send()
            .map_err(|err| PlanError::StatusSyncFailure(format!("{method} {path}: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| PlanError::StatusSyncFailure(format!("{method} {path}: {err}")))?;
        if !status.is_success() {
            return Err(PlanError::StatusSyncFailure(format!(
                "{method} {path} returned HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| {
            PlanError::StatusSyncFailure(format!("{method} {path} returned invalid JSON: {err}"))
        })
    }

    fn register_payload(&self, goal_text: &str, tasks: &[Task]) -> Value {
        json!({
            "session_id": self.session_id,
            "title": plan_title(goal_text),
            "goal_text": goal_text,
            "trigger": self.trigger,
            "priority": self.priority.map(|p| p.label()),
            "tasks": tasks
                .iter()
                .enumerate()
                .map(|(index, task)| json!({
                    "order_no": index + 1,
                    "title": plan_title(&task.content),
                    "description": task.content,
                    "max_retries": self.max_retries,
                }))
                .collect::<Vec<_>>(),
        })
    }
}

impl StatusSink for StatusReporter {
    fn register_plan(&mut self, goal_text: &str, tasks: &[Task]) -> Option<RegisteredPlan> {
        let payload = self.register_payload(goal_text, tasks);
        let registered = self
            .send(reqwest::Method::POST, "/api/plans", &payload)
            .and_then(|body| parse_registration(&body, tasks));
        match registered {
            Ok(registered) => {
                info!(
                    plan_id = %registered.plan_id,
                    tasks = registered.task_ids.len(),
                    "plan registered with status service"
                );
                self.registered = Some(registered.clone());
                Some(registered)
            }
            Err(err) => {
                warn!(error = %err, "plan registration failed; status updates will be skipped");
                self.registered = None;
                None
            }
        }
    }

    fn update_plan_status(&mut self, status: PlanStatus, final_text: Option<&str>) {
        let Some(plan_id) = self.plan_id().map(str::to_string) else {
            debug!(%status, "plan not registered; skipping plan status update");
            return;
        };
        let mut payload = json!({ "status": status });
        if let Some(text) = final_text {
            payload["goal_text"] = json!(text);
        }
        let path = format!("/api/plans/{plan_id}");
        match self.send(reqwest::Method::PUT, &path, &payload) {
            Ok(_) => debug!(%plan_id, %status, "plan status mirrored"),
            Err(err) => warn!(error = %err, %status, "plan status update failed"),
        }
    }

    fn update_task_status(&mut self, task: &Task, status: TaskStatus, result: Option<&str>) {
        let remote_id = self
            .registered
            .as_ref()
            .and_then(|r| r.task_ids.get(&task.id))
            .cloned();
        let Some(remote_id) = remote_id else {
            debug!(task = %task.id, content = %task.content, %status, "task not registered; skipping status update");
            return;
        };
        let mut payload = json!({ "status": status });
        if let Some(result) = result {
            payload["execution_result"] = json!(result);
        }
        let path = format!("/api/tasks/{remote_id}");
        match self.send(reqwest::Method::PUT, &path, &payload) {
            Ok(_) => debug!(task = %task.id, %status, "task status mirrored"),
            Err(err) => warn!(error = %err, task = %task.id, %status, "task status update failed"),
        }
    }
}

fn plan_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    first_line.chars().take(TITLE_MAX_CHARS).collect()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Server ids come back as strings or numbers. Tasks are matched by `order_no`
/// when the service echoes it, otherwise by position.
fn parse_registration(body: &Value, tasks: &[Task]) -> PlanResult<RegisteredPlan> {
    let plan_id = body
        .get("id")
        .or_else(|| body.get("plan_id"))
        .and_then(id_string)
        .ok_or_else(|| PlanError::StatusSyncFailure("registration response has no plan id".into()))?;

    let mut task_ids = BTreeMap::<TaskId, String>::new();
    let remote_tasks = body
        .get("tasks")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for (position, remote) in remote_tasks.iter().enumerate() {
        let Some(remote_id) = remote.get("id").and_then(id_string) else {
            continue;
        };
        let index = remote
            .get("order_no")
            .and_then(Value::as_u64)
            .and_then(|order| (order as usize).checked_sub(1))
            .unwrap_or(position);
        if let Some(task) = tasks.get(index) {
            task_ids.insert(task.id, remote_id);
        }
    }
    if task_ids.len() < tasks.len() {
        warn!(
            registered = task_ids.len(),
            expected = tasks.len(),
            "status service returned fewer task ids than submitted"
        );
    }
    Ok(RegisteredPlan { plan_id, task_ids })
}
