use homeplan_core::{
    ChatMessage, PlanError, PlanResult, PlanStrategy, PlannerConfig, PriorityVariant,
    ResponseFormat,
};
use homeplan_llm::LlmClient;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::parsing::{extract_json_snippet, parse_priority_plans, parse_response};
use crate::prompts::{ADVANCED_PLAN_PROMPT, PRIORITY_PLAN_PROMPT, SIMPLE_PLAN_PROMPT};

/// The three alternative task lists of a priority proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityPlans {
    pub security: Vec<String>,
    pub convenience: Vec<String>,
    pub energy: Vec<String>,
}

impl PriorityPlans {
    pub fn select(&self, variant: PriorityVariant) -> &[String] {
        match variant {
            PriorityVariant::Security => &self.security,
            PriorityVariant::Convenience => &self.convenience,
            PriorityVariant::Energy => &self.energy,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.security.is_empty() && self.convenience.is_empty() && self.energy.is_empty()
    }

    /// Accepts `{"security": [...], ...}` with optional `_plan` key suffixes;
    /// list items may be strings or objects with a `task`/`title` field.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let list = |name: &str| -> Vec<String> {
            object
                .get(name)
                .or_else(|| object.get(&format!("{name}_plan")))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s.trim().to_string()),
                            Value::Object(o) => o
                                .get("task")
                                .or_else(|| o.get("title"))
                                .and_then(Value::as_str)
                                .map(|s| s.trim().to_string()),
                            _ => None,
                        })
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };
        let plans = Self {
            security: list("security"),
            convenience: list("convenience"),
            energy: list("energy"),
        };
        (!plans.is_empty()).then_some(plans)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tasks", rename_all = "snake_case")]
pub enum PlanProposal {
    Single(Vec<String>),
    Priority(PriorityPlans),
}

impl PlanProposal {
    /// Task list to execute. `variant` only matters for priority proposals.
    pub fn tasks(&self, variant: PriorityVariant) -> Vec<String> {
        match self {
            Self::Single(tasks) => tasks.clone(),
            Self::Priority(plans) => plans.select(variant).to_vec(),
        }
    }
}

/// Answers clarifying questions raised by the advanced planner. `None` aborts.
pub trait Clarifier {
    fn answer(&mut self, question: &str) -> Option<String>;
}

impl<F> Clarifier for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn answer(&mut self, question: &str) -> Option<String> {
        self(question)
    }
}

pub struct Planner<'a> {
    llm: &'a dyn LlmClient,
    max_clarifications: usize,
}

impl<'a> Planner<'a> {
    pub fn new(llm: &'a dyn LlmClient, cfg: &PlannerConfig) -> Self {
        Self {
            llm,
            max_clarifications: cfg.max_clarifications,
        }
    }

    pub fn propose(
        &self,
        strategy: PlanStrategy,
        request: &str,
        clarifier: &mut dyn Clarifier,
    ) -> PlanResult<PlanProposal> {
        info!(%strategy, "proposing plan");
        let proposal = match strategy {
            PlanStrategy::Simple => PlanProposal::Single(self.simple(request)?),
            PlanStrategy::Advanced => PlanProposal::Single(self.advanced(request, clarifier)?),
            PlanStrategy::Priority => PlanProposal::Priority(self.priority(request)?),
        };
        debug!(?proposal, "plan proposed");
        Ok(proposal)
    }

    fn simple(&self, request: &str) -> PlanResult<Vec<String>> {
        let messages = [
            ChatMessage::system(SIMPLE_PLAN_PROMPT),
            ChatMessage::user(request),
        ];
        let reply = self.llm.complete(&messages, ResponseFormat::Text)?;
        match parse_response(&reply.text).plan {
            Some(plan) if !plan.is_empty() => Ok(plan),
            _ => Err(PlanError::unparseable("<plan> task list", &reply.text)),
        }
    }

    fn advanced(&self, request: &str, clarifier: &mut dyn Clarifier) -> PlanResult<Vec<String>> {
        let mut messages = vec![
            ChatMessage::system(ADVANCED_PLAN_PROMPT),
            ChatMessage::user(request),
        ];
        let mut rounds = 0usize;
        loop {
            let reply = self.llm.complete(&messages, ResponseFormat::Text)?;
            let parsed = parse_response(&reply.text);
            if let Some(plan) = parsed.plan.filter(|plan| !plan.is_empty()) {
                return Ok(plan);
            }
            let Some(question) = parsed.question.filter(|q| !q.is_empty()) else {
                return Err(PlanError::unparseable("<plan> or <question>", &reply.text));
            };
            if rounds >= self.max_clarifications {
                warn!(rounds, "clarification budget spent without a plan");
                return Err(PlanError::unparseable(
                    format!("<plan> within {} clarification(s)", self.max_clarifications),
                    &reply.text,
                ));
            }
            rounds += 1;
            let Some(answer) = clarifier.answer(&question) else {
                return Err(PlanError::unparseable(
                    "clarification answer",
                    &question,
                ));
            };
            let route = parsed.route.unwrap_or_else(|| "Question".to_string());
            messages.push(ChatMessage::assistant(reply.text));
            messages.push(ChatMessage::user(format!(
                "<option>\n<question>{question}</question>\n<answer>{answer}</answer>\n<route>{route}</route>\n</option>"
            )));
        }
    }

    fn priority(&self, request: &str) -> PlanResult<PriorityPlans> {
        let messages = [
            ChatMessage::system(PRIORITY_PLAN_PROMPT),
            ChatMessage::user(request),
        ];
        let reply = self.llm.complete(&messages, ResponseFormat::Json)?;
        let from_json = reply
            .json
            .as_ref()
            .and_then(PriorityPlans::from_json)
            .or_else(|| {
                extract_json_snippet(&reply.text)
                    .and_then(|snippet| serde_json::from_str::<Value>(snippet).ok())
                    .and_then(|value| PriorityPlans::from_json(&value))
            });
        if let Some(plans) = from_json {
            return Ok(plans);
        }
        debug!("priority reply is not usable JSON; scanning headers");
        let plans = parse_priority_plans(&reply.text);
        if plans.is_empty() {
            return Err(PlanError::unparseable(
                "security/convenience/energy plans",
                &reply.text,
            ));
        }
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeplan_core::LlmResponse;
    use homeplan_testkit::ScriptedLlm;
    use serde_json::json;

    fn planner_cfg() -> PlannerConfig {
        PlannerConfig::default()
    }

    fn no_questions() -> impl FnMut(&str) -> Option<String> {
        |_: &str| None
    }

    #[test]
    fn simple_strategy_reads_plan_tag() {
        let llm = ScriptedLlm::new(vec![
            "<option><plan>\n1. check lights\n2. turn on AC\n</plan><route>Plan</route></option>",
        ]);
        let planner = Planner::new(&llm, &planner_cfg());
        let proposal = planner
            .propose(PlanStrategy::Simple, "make it cozy", &mut no_questions())
            .expect("plan");
        assert_eq!(
            proposal,
            PlanProposal::Single(vec!["check lights".to_string(), "turn on AC".to_string()])
        );
        let (messages, format) = &llm.requests()[0];
        assert_eq!(*format, ResponseFormat::Text);
        assert_eq!(messages[1], ChatMessage::user("make it cozy"));
    }

    #[test]
    fn simple_strategy_without_plan_is_unparseable() {
        let llm = ScriptedLlm::new(vec!["I cannot help with that."]);
        let planner = Planner::new(&llm, &planner_cfg());
        let err = planner
            .propose(PlanStrategy::Simple, "x", &mut no_questions())
            .expect_err("no plan");
        assert!(matches!(err, PlanError::UnparseableResponse { .. }));
    }

    #[test]
    fn advanced_strategy_asks_until_plan() {
        let llm = ScriptedLlm::new(vec![
            "<option><question>Which room?</question><answer></answer><route>Question</route></option>",
            "<option><plan>1. turn on bedroom AC</plan><route>Plan</route></option>",
        ]);
        let planner = Planner::new(&llm, &planner_cfg());
        let mut asked = Vec::new();
        let mut clarifier = |question: &str| {
            asked.push(question.to_string());
            Some("bedroom".to_string())
        };
        let proposal = planner
            .propose(PlanStrategy::Advanced, "cool it down", &mut clarifier)
            .expect("plan");
        assert_eq!(proposal.tasks(PriorityVariant::Security), vec!["turn on bedroom AC"]);
        assert_eq!(asked, vec!["Which room?"]);
        let (messages, _) = &llm.requests()[1];
        let last = messages.last().expect("clarification message");
        assert!(last.content().contains("<answer>bedroom</answer>"));
        assert!(last.content().contains("<route>Question</route>"));
    }

    #[test]
    fn advanced_strategy_stops_when_user_declines() {
        let llm = ScriptedLlm::new(vec![
            "<option><question>Which room?</question><route>Question</route></option>",
        ]);
        let planner = Planner::new(&llm, &planner_cfg());
        let err = planner
            .propose(PlanStrategy::Advanced, "cool it down", &mut no_questions())
            .expect_err("declined");
        assert!(matches!(err, PlanError::UnparseableResponse { .. }));
    }

    #[test]
    fn advanced_strategy_bounds_clarification_rounds() {
        let question = "<option><question>More detail?</question><route>Question</route></option>";
        let llm = ScriptedLlm::new(vec![question, question]);
        let cfg = PlannerConfig {
            max_clarifications: 1,
            ..PlannerConfig::default()
        };
        let planner = Planner::new(&llm, &cfg);
        let mut always = |_: &str| Some("yes".to_string());
        let err = planner
            .propose(PlanStrategy::Advanced, "x", &mut always)
            .expect_err("budget spent");
        assert!(matches!(err, PlanError::UnparseableResponse { .. }));
        assert_eq!(llm.requests().len(), 2);
    }

    #[test]
    fn priority_strategy_prefers_json() {
        let llm = ScriptedLlm::with_results(vec![Ok(LlmResponse {
            text: String::new(),
            json: Some(json!({
                "security": ["lock doors"],
                "convenience_plan": [{"task": "warm bathroom"}],
                "energy": []
            })),
            credential_index: 0,
        })]);
        let planner = Planner::new(&llm, &planner_cfg());
        let proposal = planner
            .propose(PlanStrategy::Priority, "night mode", &mut no_questions())
            .expect("plans");
        let PlanProposal::Priority(plans) = &proposal else {
            panic!("expected priority proposal");
        };
        assert_eq!(plans.security, vec!["lock doors"]);
        assert_eq!(plans.convenience, vec!["warm bathroom"]);
        assert!(plans.energy.is_empty());
        assert_eq!(llm.requests()[0].1, ResponseFormat::Json);
    }

    #[test]
    fn priority_strategy_falls_back_to_headers() {
        let llm = ScriptedLlm::new(vec![
            "Plan 1: Maximum Security\n1. lock doors\nPlan 2: Balanced Comfort\n1. dim lights\nPlan 3: Energy-Efficient\n1. switch off heater",
        ]);
        let planner = Planner::new(&llm, &planner_cfg());
        let proposal = planner
            .propose(PlanStrategy::Priority, "night mode", &mut no_questions())
            .expect("plans");
        assert_eq!(proposal.tasks(PriorityVariant::Energy), vec!["switch off heater"]);
    }

    #[test]
    fn priority_strategy_with_nothing_usable_fails() {
        let llm = ScriptedLlm::new(vec!["no plans today"]);
        let planner = Planner::new(&llm, &planner_cfg());
        assert!(
            planner
                .propose(PlanStrategy::Priority, "x", &mut no_questions())
                .is_err()
        );
    }

    #[test]
    fn proposal_serializes_with_kind_tag() {
        let value = serde_json::to_value(PlanProposal::Single(vec!["a".to_string()])).expect("json");
        assert_eq!(value, json!({"kind": "single", "tasks": ["a"]}));
    }
}
