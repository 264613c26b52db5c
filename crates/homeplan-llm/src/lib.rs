mod credentials;

pub use credentials::CredentialSnapshot;

use credentials::CredentialSet;
use homeplan_core::{ChatMessage, LlmConfig, LlmResponse, PlanError, PlanResult, ResponseFormat};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub trait LlmClient {
    /// Send `messages` and return the model's reply.
    ///
    /// With [`ResponseFormat::Json`] the provider is asked for a JSON object and
    /// the parsed value is attached to the response when the content parses.
    fn complete(&self, messages: &[ChatMessage], format: ResponseFormat)
    -> PlanResult<LlmResponse>;
}

/// Chat-completions client that rotates across several API keys on HTTP 429.
///
/// The credential set is shared by every caller of one client; the lock is held
/// only while picking a key or recording an outcome, never across the request
/// or a sleep.
#[derive(Debug)]
pub struct ChatClient {
    cfg: LlmConfig,
    client: Client,
    credentials: Mutex<CredentialSet>,
}

impl ChatClient {
    pub fn new(cfg: LlmConfig) -> PlanResult<Self> {
        let keys = cfg.resolve_api_keys();
        Self::with_keys(cfg, keys)
    }

    pub fn with_keys(cfg: LlmConfig, keys: Vec<String>) -> PlanResult<Self> {
        if keys.is_empty() {
            return Err(PlanError::MissingCredentials);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .map_err(|err| PlanError::Config(format!("failed to build HTTP client: {err}")))?;
        info!(keys = keys.len(), model = %cfg.model, "chat client ready");
        Ok(Self {
            cfg,
            client,
            credentials: Mutex::new(CredentialSet::new(keys)),
        })
    }

    pub fn credential_count(&self) -> usize {
        self.credentials().len()
    }

    pub fn credential_snapshot(&self) -> CredentialSnapshot {
        self.credentials().snapshot()
    }

    fn credentials(&self) -> MutexGuard<'_, CredentialSet> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn build_payload(&self, messages: &[ChatMessage], format: ResponseFormat) -> Value {
        let mut payload = json!({
            "model": self.cfg.model,
            "messages": messages,
            "temperature": self.cfg.temperature,
            "stream": false,
        });
        if format == ResponseFormat::Json {
            payload["response_format"] = json!({"type": "json_object"});
        }
        payload
    }

    fn send_once(
        &self,
        index: usize,
        key: &str,
        payload: &Value,
        format: ResponseFormat,
    ) -> PlanResult<LlmResponse> {
        let response = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(key)
            .json(payload)
            .send()
            .map_err(|err| format_transport_error(&err))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| PlanError::upstream(Some(status.as_u16()), err.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PlanError::RateLimited {
                key_index: index,
                detail: error_detail(&body),
            });
        }
        if !status.is_success() {
            return Err(format_api_error(status, &body));
        }

        let text = parse_completion_content(&body)?;
        let json = match format {
            ResponseFormat::Text => None,
            ResponseFormat::Json => match serde_json::from_str::<Value>(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(error = %err, "JSON response format requested but content did not parse");
                    None
                }
            },
        };
        Ok(LlmResponse {
            text,
            json,
            credential_index: index,
        })
    }
}

impl LlmClient for ChatClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> PlanResult<LlmResponse> {
        let payload = self.build_payload(messages, format);
        let spacing = Duration::from_millis(self.cfg.request_spacing_ms);
        let cycles = self.cfg.rotation_cycles.max(1);
        let mut cycle: u32 = 1;

        loop {
            let reservation = self.credentials().reserve(
                Instant::now(),
                self.cfg.max_requests_per_minute,
                spacing,
            );
            if !reservation.wait.is_zero() {
                debug!(
                    credential = reservation.index + 1,
                    wait_ms = reservation.wait.as_millis() as u64,
                    "local rate budget reached; waiting"
                );
                thread::sleep(reservation.wait);
            }
            info!(
                credential = reservation.index + 1,
                cycle,
                messages = messages.len(),
                "sending chat completion"
            );

            match self.send_once(reservation.index, &reservation.key, &payload, format) {
                Ok(response) => return Ok(response),
                Err(PlanError::RateLimited { key_index, detail }) => {
                    let mut credentials = self.credentials();
                    if credentials.mark_failed_and_rotate(key_index) {
                        let next = credentials.snapshot().current;
                        drop(credentials);
                        warn!(
                            credential = key_index + 1,
                            next = next + 1,
                            %detail,
                            "rate limited; rotating to next API key"
                        );
                        continue;
                    }
                    let keys = credentials.len();
                    drop(credentials);

                    if cycle >= cycles {
                        warn!(keys, cycles, "every API key stayed rate limited");
                        return Err(PlanError::AllCredentialsExhausted { keys, cycles });
                    }
                    warn!(
                        keys,
                        cycle,
                        cooldown_ms = self.cfg.cooldown_ms,
                        "all API keys rate limited; cooling down"
                    );
                    thread::sleep(Duration::from_millis(self.cfg.cooldown_ms));
                    self.credentials().start_new_cycle();
                    cycle += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn format_api_error(status: StatusCode, body: &str) -> PlanError {
    let detail = error_detail(body);
    let message = match status {
        StatusCode::UNAUTHORIZED => format!(
            "invalid or missing API key. Check HOMEPLAN_API_KEY_1..3 or llm.api_keys in settings. Detail: {detail}"
        ),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => {
            format!("provider unavailable. Detail: {detail}")
        }
        _ => detail,
    };
    PlanError::upstream(Some(status.as_u16()), message)
}

fn format_transport_error(err: &reqwest::Error) -> PlanError {
    let inner = err
        .source()
        .map(|e| e.to_string())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let message = if err.is_timeout() {
        "request timed out; consider raising llm.timeout_seconds".to_string()
    } else if inner.contains("dns") || inner.contains("resolve") || inner.contains("no such host") {
        "DNS resolution failed for the provider endpoint".to_string()
    } else if err.is_connect() {
        "could not connect to the provider endpoint".to_string()
    } else {
        format!("network error: {err}")
    };
    PlanError::upstream(None, message)
}

/// `choices[0].message.content` of a non-streaming completion.
fn parse_completion_content(body: &str) -> PlanResult<String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| PlanError::upstream(None, format!("malformed completion payload: {err}")))?;
    let message = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| {
            PlanError::upstream(None, "unexpected completion payload: missing choices[0].message")
        })?;
    Ok(message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string())
}
