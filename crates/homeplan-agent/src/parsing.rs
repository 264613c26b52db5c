use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::planner::PriorityPlans;

/// Route label inferred when a reply carries a final answer but no route.
pub const FINAL_ANSWER_ROUTE: &str = "Final Answer";

/// Fields recovered from a tagged model reply. Every field is independent;
/// `None` means the tag was absent, `Some(vec![])` means it was present but empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedResponse {
    pub route: Option<String>,
    pub plan: Option<Vec<String>>,
    pub current_plan: Option<Vec<String>>,
    pub pending: Option<Vec<String>>,
    pub completed: Option<Vec<String>>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub final_answer: Option<String>,
}

impl ParsedResponse {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone, Copy)]
enum Field {
    Route,
    Plan,
    CurrentPlan,
    Pending,
    Completed,
    Question,
    Answer,
    FinalAnswer,
}

const FIELDS: [(Field, &str); 8] = [
    (Field::Route, "route"),
    (Field::Plan, "plan"),
    (Field::CurrentPlan, "current-plan"),
    (Field::Pending, "pending"),
    (Field::Completed, "completed"),
    (Field::Question, "question"),
    (Field::Answer, "answer"),
    (Field::FinalAnswer, "final-answer"),
];

static TAG_PATTERNS: LazyLock<Vec<(Field, Regex)>> = LazyLock::new(|| {
    FIELDS
        .iter()
        .filter_map(|(field, tag)| {
            let tag = regex::escape(tag);
            Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>"))
                .ok()
                .map(|re| (*field, re))
        })
        .collect()
});

/// Remove Markdown fence tokens (```` ``` ````, ```` ```xml ````) and keep the rest
/// of each line, so `` ```xml <pending>..</pending>``` `` still parses.
pub fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .map(strip_fence_tokens)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_fence_tokens(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        // A language tag only counts when it is followed by a break or markup.
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
            .unwrap_or(rest.len());
        let after = &rest[tag_len..];
        if tag_len > 0
            && (after.is_empty() || after.starts_with(|c: char| c.is_whitespace() || c == '<'))
        {
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

pub fn parse_response(raw: &str) -> ParsedResponse {
    let text = strip_code_fences(raw);
    let mut parsed = ParsedResponse::default();
    for (field, pattern) in TAG_PATTERNS.iter() {
        let Some(content) = pattern
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
        else {
            continue;
        };
        match field {
            Field::Route => parsed.route = Some(content),
            Field::Plan => parsed.plan = Some(split_task_list(&content)),
            Field::CurrentPlan => parsed.current_plan = Some(split_task_list(&content)),
            Field::Pending => parsed.pending = Some(split_task_list(&content)),
            Field::Completed => parsed.completed = Some(split_task_list(&content)),
            Field::Question => parsed.question = Some(content),
            Field::Answer => parsed.answer = Some(content),
            Field::FinalAnswer => parsed.final_answer = Some(content),
        }
    }
    if parsed.route.is_none() && parsed.final_answer.is_some() {
        parsed.route = Some(FINAL_ANSWER_ROUTE.to_string());
    }
    if parsed.is_empty() {
        debug!(chars = raw.len(), "no recognized tags in model reply");
    }
    parsed
}

/// One task per non-empty line, enumeration and checkbox markers removed.
pub fn split_task_list(block: &str) -> Vec<String> {
    block
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let mut rest = line.trim();
    loop {
        let before = rest;
        for marker in ["[ ]", "[x]", "[X]", "-", "–", "*", "•"] {
            if let Some(stripped) = rest.strip_prefix(marker) {
                rest = stripped.trim_start();
            }
        }
        rest = strip_ordinal(rest);
        if rest == before {
            return rest.trim_end();
        }
    }
}

/// `12. task` or `3) task`, but not `2.5 hours`.
fn strip_ordinal(text: &str) -> &str {
    let digits = text.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return text;
    }
    let rest = &text[digits..];
    let Some(after) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) else {
        return text;
    };
    if after.starts_with(|c: char| c.is_ascii_digit()) {
        return text;
    }
    after.trim_start()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Security,
    Convenience,
    Energy,
}

/// Recover the three priority plans from free-form headed text.
///
/// Headers such as `Plan 1:`, `Maximum Security` or 🥇 open a section and the
/// numbered lines below it are its tasks. When no strict header matches, a
/// second pass accepts looser headers (`security`, `plan 2`, ...).
pub fn parse_priority_plans(text: &str) -> PriorityPlans {
    let text = strip_code_fences(text);
    let strict = scan_priority_sections(&text, strict_header, true);
    if !strict.is_empty() {
        return strict;
    }
    scan_priority_sections(&text, loose_header, false)
}

/// With `numbered_headers`, a numbered line is tried as a header before it
/// is taken as a task (`1. Plan 1: Maximum Security`).
fn scan_priority_sections(
    text: &str,
    header: fn(&str) -> Option<Slot>,
    numbered_headers: bool,
) -> PriorityPlans {
    let mut plans = PriorityPlans::default();
    let mut current = None;
    for line in text.lines().map(str::trim) {
        let numbered = line.starts_with(|c: char| c.is_ascii_digit()) && strip_ordinal(line) != line;
        if (numbered_headers || !numbered)
            && let Some(slot) = header(line)
        {
            current = Some(slot);
            continue;
        }
        let Some(slot) = current else {
            continue;
        };
        if !numbered {
            continue;
        }
        let task = strip_ordinal(line).trim();
        if task.is_empty() {
            continue;
        }
        let bucket = match slot {
            Slot::Security => &mut plans.security,
            Slot::Convenience => &mut plans.convenience,
            Slot::Energy => &mut plans.energy,
        };
        bucket.push(task.to_string());
    }
    plans
}

fn strict_header(line: &str) -> Option<Slot> {
    if line.contains("Plan 1:") || line.contains("Maximum Security") || line.contains('🥇') {
        Some(Slot::Security)
    } else if line.contains("Plan 2:") || line.contains("Balanced Comfort") || line.contains('🥈') {
        Some(Slot::Convenience)
    } else if line.contains("Plan 3:") || line.contains("Energy-Efficient") || line.contains('🥉') {
        Some(Slot::Energy)
    } else {
        None
    }
}

fn loose_header(line: &str) -> Option<Slot> {
    let lower = line.to_lowercase();
    if lower.contains("plan 1") || lower.contains("security") {
        Some(Slot::Security)
    } else if lower.contains("plan 2") || lower.contains("convenience") || lower.contains("comfort") {
        Some(Slot::Convenience)
    } else if lower.contains("plan 3") || lower.contains("energy") {
        Some(Slot::Energy)
    } else {
        None
    }
}

/// Slice of `text` holding its outermost JSON object, fenced or bare.
pub(crate) fn extract_json_snippet(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && end > start
    {
        return Some(text[start..=end].trim());
    }
    None
}
