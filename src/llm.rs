use async_trait::async_trait;
use base64::Engine;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

// ========================= Messages =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, content: vec![ContentBlock::Text { text: text.into() }] }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Attaches a PNG as an inline data URI.
    pub fn with_png(mut self, png: &[u8]) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD.encode(png);
        self.content.push(ContentBlock::ImageUrl {
            image_url: ImageUrl { url: format!("data:image/png;base64,{b64}"), detail: "high".to_string() },
        });
        self
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Message history of one LLM-backed role. Index 0 is always the system prompt.
#[derive(Clone, Debug)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self { messages: vec![Message::system(system_prompt)] }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.messages[0] = Message::system(prompt);
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Message::assistant(text));
    }

    /// Removes a message; the system prompt cannot be removed.
    pub fn remove_message_at(&mut self, index: usize) -> Option<Message> {
        (index > 0 && index < self.messages.len()).then(|| self.messages.remove(index))
    }

    /// Evicts the oldest user/assistant pair until at most `2 * max_window + 1`
    /// messages remain.
    pub fn prune(&mut self, max_window: usize) {
        let limit = 2 * max_window + 1;
        while self.messages.len() > limit.max(1) {
            self.messages.remove(1);
            if self.messages.len() > limit.max(1) {
                self.messages.remove(1);
            }
        }
    }

    /// Drops everything but the system prompt.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

// ========================= Completion trait =========================

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompletionError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("bad request {status}: {body}")]
    BadRequest { status: u16, body: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("completion returned no content")]
    EmptyResponse,
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl CompletionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. } | Self::Server { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.0, max_tokens: 1500 }
    }
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn generate(&self, messages: &[Message], params: GenerationParams) -> Result<String, CompletionError>;
}

/// Calls `llm` and logs a failure, returning an empty string in its place.
pub async fn generate_or_empty(llm: &dyn Completion, messages: &[Message], params: GenerationParams) -> String {
    match llm.generate(messages, params).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "completion failed; continuing with an empty response");
            String::new()
        }
    }
}

// ========================= OpenAI-compatible client =========================

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub max_elapsed: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Requests per minute; `None` disables throttling.
    pub rate_limit: Option<u32>,
    pub price_per_1k_tokens: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            request_timeout: Duration::from_secs(60),
            max_retries: 6,
            max_elapsed: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            rate_limit: std::env::var("OPENAI_RATE_LIMIT").ok().and_then(|v| v.parse().ok()).filter(|r| *r > 0),
            price_per_1k_tokens: 0.02,
        }
    }
}

impl LlmConfig {
    fn request_interval(&self) -> Option<Duration> {
        self.rate_limit.map(|rpm| Duration::from_secs_f64(60.0 / f64::from(rpm)))
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(cfg: &LlmConfig, attempt: u32, err: &CompletionError) -> Duration {
    if let CompletionError::RateLimited { retry_after: Some(secs) } = err {
        return Duration::from_secs(*secs).min(cfg.max_backoff);
    }
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    cfg.initial_backoff.saturating_mul(factor).min(cfg.max_backoff)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Retries `send` while it fails transiently, sleeping [`backoff_delay`] between
/// attempts, until it succeeds, fails for good or runs past the retry or time cap.
pub async fn retry_with_backoff<F, Fut>(cfg: &LlmConfig, mut send: F) -> Result<String, CompletionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, CompletionError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        let err = match send().await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        attempt += 1;
        let delay = backoff_delay(cfg, attempt, &err);
        if attempt > cfg.max_retries || started.elapsed() + delay > cfg.max_elapsed {
            return Err(CompletionError::Exhausted { attempts: attempt, last: err.to_string() });
        }
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient completion error; retrying");
        tokio::time::sleep(delay).await;
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    cfg: LlmConfig,
    limiter: Option<Limiter>,
    billed_tokens: AtomicU64,
}

impl OpenAiClient {
    pub fn new(cfg: LlmConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        // one request per interval, no bursts
        let limiter = cfg.request_interval().and_then(Quota::with_period).map(RateLimiter::direct);
        Ok(Self { http, cfg, limiter, billed_tokens: AtomicU64::new(0) })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.cfg
    }

    /// Running cost estimate; every response is billed 500 tokens on top of its usage.
    pub fn cost(&self) -> f64 {
        self.billed_tokens.load(Ordering::Relaxed) as f64 / 1000.0 * self.cfg.price_per_1k_tokens
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn send_once(&self, messages: &[Message], params: GenerationParams) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.cfg.api_base.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.cfg.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body, retry_after));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| CompletionError::Decode(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            self.billed_tokens.fetch_add(usage.total_tokens + 500, Ordering::Relaxed);
        }
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(CompletionError::EmptyResponse)?;
        debug!(chars = text.len(), cost = self.cost(), "completion received");
        Ok(text)
    }
}

pub fn classify_status(status: u16, body: String, retry_after: Option<u64>) -> CompletionError {
    match status {
        429 => CompletionError::RateLimited { retry_after },
        401 | 403 => CompletionError::Auth(body),
        408 | 500..=599 => CompletionError::Server { status, body },
        _ => CompletionError::BadRequest { status, body },
    }
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn generate(&self, messages: &[Message], params: GenerationParams) -> Result<String, CompletionError> {
        retry_with_backoff(&self.cfg, move || async move {
            self.throttle().await;
            self.send_once(messages, params).await
        })
        .await
    }
}

// ========================= Scripted double =========================

/// Replays canned replies in order and records every request it receives.
/// Once the script runs out it answers `EmptyResponse`.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_error(&self, err: CompletionError) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err));
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn generate(&self, messages: &[Message], _params: GenerationParams) -> Result<String, CompletionError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(Err(CompletionError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn prune_keeps_system_prompt_and_bound() {
        let mut conv = Conversation::new("system");
        for i in 0..20 {
            conv.push_user(format!("u{i}"));
            conv.push_assistant(format!("a{i}"));
            conv.prune(3);
            assert!(conv.len() <= 7);
            assert_eq!(conv.messages()[0], Message::system("system"));
        }
        // the oldest pairs went first
        assert_eq!(conv.messages()[1].text(), "u17");
        assert_eq!(conv.last().map(Message::text).as_deref(), Some("a19"));
    }

    #[test]
    fn system_prompt_cannot_be_removed() {
        let mut conv = Conversation::new("system");
        conv.push_user("hi");
        assert!(conv.remove_message_at(0).is_none());
        assert_eq!(conv.remove_message_at(1).map(|m| m.role), Some(Role::User));
        conv.push_user("again");
        conv.reset();
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn image_blocks_serialize_as_data_uris() {
        let msg = Message::user("look").with_png(&[1, 2, 3]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AQID");
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(429, String::new(), Some(3)).is_transient());
        assert!(classify_status(503, String::new(), None).is_transient());
        assert!(!classify_status(401, String::new(), None).is_transient());
        assert!(!classify_status(400, String::new(), None).is_transient());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = LlmConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            ..LlmConfig::default()
        };
        let err = CompletionError::Transport("reset".into());
        let delays: Vec<u64> = (1..=6).map(|a| backoff_delay(&cfg, a, &err).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);

        let limited = CompletionError::RateLimited { retry_after: Some(7) };
        assert_eq!(backoff_delay(&cfg, 1, &limited), Duration::from_secs(7));
        let limited = CompletionError::RateLimited { retry_after: Some(70) };
        assert_eq!(backoff_delay(&cfg, 1, &limited), Duration::from_secs(10));
    }

    fn quick_retries(max_retries: u32) -> LlmConfig {
        LlmConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_elapsed: Duration::from_secs(5),
            ..LlmConfig::default()
        }
    }

    /// Hands out `outcomes` in order, counting calls.
    fn sender(
        outcomes: Vec<Result<String, CompletionError>>,
    ) -> (Arc<AtomicU64>, impl FnMut() -> std::future::Ready<Result<String, CompletionError>>) {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let mut outcomes: VecDeque<_> = outcomes.into();
        let send = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(outcomes.pop_front().unwrap_or(Err(CompletionError::EmptyResponse)))
        };
        (calls, send)
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let (calls, send) = sender(vec![
            Err(classify_status(503, "busy".into(), None)),
            Err(CompletionError::Transport("connection reset".into())),
            Err(classify_status(429, String::new(), Some(0))),
            Ok("answer".into()),
        ]);
        let reply = retry_with_backoff(&quick_retries(6), send).await;
        assert_eq!(reply.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let (calls, send) = sender(vec![Err(classify_status(401, "bad key".into(), None)), Ok("never".into())]);
        let err = retry_with_backoff(&quick_retries(6), send).await.unwrap_err();
        assert_eq!(err, CompletionError::Auth("bad key".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (calls, send) = sender(vec![Err(classify_status(400, "bad body".into(), None))]);
        let err = retry_with_backoff(&quick_retries(6), send).await.unwrap_err();
        assert!(matches!(err, CompletionError::BadRequest { status: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_cap_reports_exhaustion() {
        let failures = (0..10).map(|_| Err(classify_status(502, "gateway".into(), None))).collect();
        let (calls, send) = sender(failures);
        let err = retry_with_backoff(&quick_retries(2), send).await.unwrap_err();
        assert!(matches!(err, CompletionError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rate_limit_becomes_a_request_interval() {
        let cfg = LlmConfig { rate_limit: Some(30), ..LlmConfig::default() };
        assert_eq!(cfg.request_interval(), Some(Duration::from_secs(2)));
        let client = OpenAiClient::new(cfg).unwrap();
        assert!(client.limiter.is_some());
        let client = OpenAiClient::new(LlmConfig { rate_limit: None, ..LlmConfig::default() }).unwrap();
        assert!(client.limiter.is_none());
    }

    #[tokio::test]
    async fn scripted_completion_replays_and_records() {
        let llm = ScriptedCompletion::new(["first"]);
        llm.push_error(CompletionError::Auth("nope".into()));
        let msgs = [Message::user("q")];
        assert_eq!(llm.generate(&msgs, GenerationParams::default()).await.unwrap(), "first");
        assert_eq!(generate_or_empty(&llm, &msgs, GenerationParams::default()).await, "");
        assert_eq!(generate_or_empty(&llm, &msgs, GenerationParams::default()).await, "");
        assert_eq!(llm.calls(), 3);
    }
}
