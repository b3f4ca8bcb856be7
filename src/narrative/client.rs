//! Chat-completions transport for the model-backed narrative.
//!
//! Only the HTTP call and its rate-limit retry policy live here; the
//! grounding contract is enforced by the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LlmProvider, LlmSettings, MAX_BACKOFF_SECS};

/// Bytes of an error body kept for diagnostics.
const BODY_PREVIEW_LEN: usize = 500;
const SYSTEM_PROMPT: &str = "You are a careful clinical summarizer.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("{0}")]
    MissingCredentials(String),

    #[error("Request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("Connection to {url} failed: {detail}")]
    Connection { url: String, detail: String },

    #[error("Rate limit still in effect after {attempts} attempts (status {status})")]
    RateLimited { status: u16, attempts: u32 },

    #[error("Backend returned error (status {status}, content_type={content_type}): {body_preview}")]
    Http {
        status: u16,
        content_type: String,
        body_preview: String,
    },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl LlmError {
    /// Timeouts, connection failures and rate limiting may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Connection { .. } | Self::RateLimited { .. }
        )
    }
}

/// A text-completion backend.
pub trait LlmClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff with jitter for 429/503 responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_jitter_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::config::MAX_TRANSPORT_RETRIES,
            max_jitter_secs: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        matches!(status, 429 | 503) && attempt < self.max_retries
    }

    /// Delay before the next attempt: the server's hint when present, else
    /// `2^attempt` seconds, plus `jitter` (expected in `[0, max_jitter_secs)`).
    /// The total never exceeds `MAX_BACKOFF_SECS`.
    pub fn delay(&self, attempt: u32, retry_after_secs: Option<f64>, jitter: f64) -> Duration {
        let base = retry_after_secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or_else(|| 2f64.powi(attempt.min(16) as i32));
        let jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        Duration::from_secs_f64((base + jitter).min(MAX_BACKOFF_SECS))
    }

    fn sample_jitter(&self) -> f64 {
        if self.max_jitter_secs <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(0.0..self.max_jitter_secs)
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)
}

// ---------------------------------------------------------------------------
// Chat-completions client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (OpenAI or an Azure deployment).
pub struct ChatCompletionsClient {
    settings: LlmSettings,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl ChatCompletionsClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;
        let retry = RetryPolicy {
            max_retries: settings.max_retries,
            ..RetryPolicy::default()
        };
        Ok(Self {
            settings,
            client,
            retry,
        })
    }

    pub fn url(&self) -> String {
        match &self.settings.provider {
            LlmProvider::OpenAi { base_url, .. } => format!("{base_url}/chat/completions"),
            LlmProvider::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn request(&self, url: &str, prompt: &str) -> reqwest::blocking::RequestBuilder {
        let (builder, model) = match &self.settings.provider {
            LlmProvider::OpenAi { api_key, .. } => (
                self.client.post(url).bearer_auth(api_key),
                Some(self.settings.model.as_str()),
            ),
            // Azure routes by deployment; the model field is not sent.
            LlmProvider::Azure { api_key, .. } => (self.client.post(url).header("api-key", api_key), None),
        };
        builder.json(&ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        })
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                url: url.to_string(),
                secs: self.settings.timeout_secs,
            }
        } else if e.is_connect() {
            LlmError::Connection {
                url: url.to_string(),
                detail: e.to_string(),
            }
        } else {
            LlmError::Client(e.to_string())
        }
    }
}

fn preview(text: &str, limit: usize) -> String {
    text.trim().chars().take(limit).collect()
}

impl LlmClient for ChatCompletionsClient {
    fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = self.url();
        let mut attempt = 0;

        loop {
            let response = self
                .request(&url, prompt)
                .send()
                .map_err(|e| self.map_send_error(&url, e))?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();

            if !response.status().is_success() {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);

                if self.retry.should_retry(status, attempt) {
                    let delay = self.retry.delay(attempt, retry_after, self.retry.sample_jitter());
                    tracing::warn!(
                        status,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Narrative backend busy, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }

                if matches!(status, 429 | 503) {
                    return Err(LlmError::RateLimited {
                        status,
                        attempts: attempt + 1,
                    });
                }
                let body = response.text().unwrap_or_default();
                return Err(LlmError::Http {
                    status,
                    content_type,
                    body_preview: preview(&body, BODY_PREVIEW_LEN),
                });
            }

            let text = response.text().map_err(|e| self.map_send_error(&url, e))?;
            let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                LlmError::InvalidResponse(format!(
                    "non-JSON body (status={status} content_type={content_type}): {e}; body_preview={}",
                    preview(&text, BODY_PREVIEW_LEN)
                ))
            })?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| LlmError::InvalidResponse("response has no message content".into()));
        }
    }
}

// ---------------------------------------------------------------------------
// Mock client
// ---------------------------------------------------------------------------

/// Mock LLM client for testing: replays scripted replies in order and then
/// repeats the last one. Counts calls.
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self::scripted(vec![Ok(response.to_string())])
    }

    pub fn failing(error: LlmError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    pub fn scripted(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::Client("mock reply queue poisoned".into()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| LlmError::Client("mock reply queue poisoned".into()))?;
        if let Some(reply) = next {
            *last = Some(reply);
        }
        last.clone()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("mock has no scripted reply".into())))
    }
}
