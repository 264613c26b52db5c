mod config;
mod error;

pub use config::{AppConfig, ExecutionConfig, LlmConfig, PlannerConfig, StatusConfig};
pub use error::{PlanError, PlanResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_CHAT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Appended to task results that were cut down to fit a payload budget.
pub const RESULT_TRUNCATION_MARKER: &str = "... [response truncated for brevity]";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".homeplan")
}

/// Cut `text` to `max_chars` characters and append `marker` when it was longer.
///
/// Counts `char`s, not bytes, so multi-byte text is never split mid-codepoint.
/// A truncated result is exactly `max_chars + marker.chars().count()` long.
pub fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(marker);
    out
}

/// A role-tagged message in a conversation transcript.
///
/// Serializes to the `{"role": ..., "content": ...}` shape chat-completion
/// providers expect; the human role goes over the wire as `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content
            }
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Same role, different content.
    pub fn with_content(&self, content: String) -> Self {
        match self {
            Self::System { .. } => Self::System { content },
            Self::User { .. } => Self::User { content },
            Self::Assistant { .. } => Self::Assistant { content },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the provider for a JSON object (`response_format: json_object`).
    Json,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    /// Parsed content, present when [`ResponseFormat::Json`] was requested.
    pub json: Option<serde_json::Value>,
    /// 0-based index of the credential that produced this response.
    pub credential_index: usize,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    PlanCreated,
    InProgress,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PlanCreated => "plan_created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal identity of a task within one plan, assigned at creation time.
///
/// Task text is not an identity: the same instruction may legitimately appear
/// twice in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0 + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub content: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            status: TaskStatus::Pending,
            result: None,
        }
    }
}

/// How a request is turned into a task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategy {
    /// One model call, one plan.
    Simple,
    /// Like `Simple`, but the model may ask clarifying questions first.
    Advanced,
    /// Three alternative plans, one per [`PriorityVariant`]; the user picks.
    #[default]
    Priority,
}

impl PlanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Advanced => "advanced",
            Self::Priority => "priority",
        }
    }
}

impl FromStr for PlanStrategy {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "advanced" | "advance" => Ok(Self::Advanced),
            "priority" => Ok(Self::Priority),
            other => Err(PlanError::Config(format!(
                "unknown plan strategy '{other}' (expected simple, advanced or priority)"
            ))),
        }
    }
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three heuristically-labeled plan alternatives of [`PlanStrategy::Priority`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityVariant {
    #[default]
    Security,
    Convenience,
    Energy,
}

impl PriorityVariant {
    pub const ALL: [PriorityVariant; 3] = [Self::Security, Self::Convenience, Self::Energy];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Convenience => "convenience",
            Self::Energy => "energy",
        }
    }

    /// Plan type reported to the status service, e.g. `priority_security`.
    pub fn plan_type(&self) -> String {
        format!("priority_{}", self.label())
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Security => "Security Priority Plan",
            Self::Convenience => "Convenience Priority Plan",
            Self::Energy => "Energy Efficiency Priority Plan",
        }
    }

    pub fn focus(&self) -> &'static str {
        match self {
            Self::Security => "Maximum safety and security",
            Self::Convenience => "User experience and ease of use",
            Self::Energy => "Minimal resource consumption",
        }
    }

    /// 1-based position in the selection menu.
    pub fn menu_index(&self) -> u8 {
        match self {
            Self::Security => 1,
            Self::Convenience => 2,
            Self::Energy => 3,
        }
    }

    pub fn from_menu_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.menu_index() == index)
    }
}

impl FromStr for PriorityVariant {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if let Ok(index) = normalized.parse::<u8>() {
            return Self::from_menu_index(index).ok_or_else(|| {
                PlanError::Config(format!("priority index {index} is out of range 1-3"))
            });
        }
        match normalized.trim_start_matches("priority_") {
            "security" => Ok(Self::Security),
            "convenience" => Ok(Self::Convenience),
            "energy" | "energy-efficiency" | "energy_efficiency" => Ok(Self::Energy),
            other => Err(PlanError::Config(format!(
                "unknown priority '{other}' (expected security, convenience or energy)"
            ))),
        }
    }
}

impl fmt::Display for PriorityVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Server-side identifiers handed back when a plan is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPlan {
    pub plan_id: String,
    pub task_ids: BTreeMap<TaskId, String>,
}

/// Destination for plan/task lifecycle transitions.
///
/// Implementations are best-effort: they absorb and log their own failures
/// and never abort the caller.
pub trait StatusSink {
    fn register_plan(&mut self, goal_text: &str, tasks: &[Task]) -> Option<RegisteredPlan>;

    fn update_plan_status(&mut self, status: PlanStatus, final_text: Option<&str>);

    fn update_task_status(&mut self, task: &Task, status: TaskStatus, result: Option<&str>);
}
