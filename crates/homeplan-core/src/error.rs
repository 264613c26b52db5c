use thiserror::Error;

pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Failure taxonomy shared by the invoker, parser, reporter and state machine.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Provider answered HTTP 429 for the credential at `key_index` (0-based).
    #[error("rate limited (HTTP 429) on API key #{}: {detail}", .key_index + 1)]
    RateLimited { key_index: usize, detail: String },

    /// Any other provider or transport failure. Never retried.
    #[error("{}", format_upstream(.status, .message))]
    Upstream { status: Option<u16>, message: String },

    #[error(
        "all {keys} API key(s) were rate limited in each of {cycles} rotation cycle(s); check key validity or try again later"
    )]
    AllCredentialsExhausted { keys: usize, cycles: u32 },

    #[error(
        "no API key configured; set HOMEPLAN_API_KEY_1 (and optionally _2, _3) or llm.api_keys in settings"
    )]
    MissingCredentials,

    /// The model answered, but none of the expected fields could be found.
    #[error("unparseable model response (expected {expected}): {preview}")]
    UnparseableResponse { expected: String, preview: String },

    /// Status mirroring failed. Absorbed by the reporter, never surfaced by it.
    #[error("status sync failed: {0}")]
    StatusSyncFailure(String),

    #[error("task executor failed: {0}")]
    Executor(String),

    #[error("plan did not finish within {0} iterations")]
    IterationLimit(usize),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PlanError {
    pub fn unparseable(expected: impl Into<String>, raw: &str) -> Self {
        Self::UnparseableResponse {
            expected: expected.into(),
            preview: raw.chars().take(200).collect(),
        }
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Only rate limiting is worth another attempt (on a different credential).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

fn format_upstream(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("upstream error (HTTP {code}): {message}"),
        None => format!("upstream error: {message}"),
    }
}
