use std::{
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// The no-audio sentinel used by the backend in `tts_audio_path` fields.
pub const NO_AUDIO_SENTINEL: &str = "None";

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResponseFlags {
    pub contains_personal_info: bool,
    pub requires_followup: bool,
    pub confidence_score: f64,
    pub category: String,
    pub language_detected: String,
    pub sentiment: String,
    pub response_type: String,
    pub urgency_level: String,
    pub topic_continuation: bool,
    pub contains_numbers: bool,
    pub actionable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub flags: ResponseFlags,
    #[serde(default)]
    pub tts_audio_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Thread {
    pub conversation_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSender {
    User,
    Assistant,
}

/// Per-record flags come in two shapes: the scored response shape and the
/// safety-check shape attached to user records.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RecordFlags {
    Scored(ResponseFlags),
    Safety {
        #[serde(rename = "type")]
        kind: String,
        safe: bool,
    },
}

impl Default for RecordFlags {
    fn default() -> Self {
        Self::Safety {
            kind: String::new(),
            safe: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessageRecord {
    pub log_id: String,
    pub sender: RecordSender,
    #[serde(default)]
    pub user_query: String,
    #[serde(default)]
    pub response_text: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
    #[serde(default)]
    pub flags: RecordFlags,
    pub timestamp: String,
    #[serde(default)]
    pub tts_audio_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessages {
    pub conversation_id: String,
    pub thread_title: String,
    pub messages: Vec<ThreadMessageRecord>,
    pub total_messages: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedThread {
    pub conversation_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Network(String),
    Http { status: u16, message: String },
    InvalidResponse(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(message) => write!(f, "Network error: {message}"),
            Self::Http { status, message } => {
                write!(f, "Backend request failed with status {status}: {message}")
            }
            Self::InvalidResponse(message) => write!(f, "Invalid backend response: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Request/response contract to the remote chat backend. The session
/// controller only ever talks to this seam, so tests can substitute a stub.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn ping(&self) -> Result<PingResponse, BackendError>;
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;
    async fn create_thread(&self, user_id: &str, title: &str)
        -> Result<CreatedThread, BackendError>;
    async fn user_threads(&self, user_id: &str) -> Result<Vec<Thread>, BackendError>;
    async fn thread_messages(&self, conversation_id: &str)
        -> Result<ThreadMessages, BackendError>;

    /// Joins a server-relative audio path onto the backend base URL. Pure
    /// string work, no I/O.
    fn audio_url(&self, path: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub auth_token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auth_token: None,
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(base_url) = read_non_empty_env("MANNY_BACKEND_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Some(timeout_secs) = read_u64_env("MANNY_BACKEND_TIMEOUT_SECS") {
            config.request_timeout_secs = timeout_secs.max(1);
        }

        config.auth_token = read_non_empty_env("MANNY_AUTH_TOKEN");

        debug!(
            base_url = %config.base_url,
            request_timeout_secs = config.request_timeout_secs,
            has_auth_token = config.auth_token.is_some(),
            "loaded backend config"
        );
        config
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: Client,
    base_url: String,
    auth_token: Arc<RwLock<Option<String>>>,
}

impl HttpBackendClient {
    pub fn new(config: BackendConfig) -> Self {
        info!(
            base_url = %config.base_url,
            request_timeout_secs = config.request_timeout_secs,
            "backend client initialized"
        );
        Self {
            client: build_client(&config),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: Arc::new(RwLock::new(config.auth_token)),
        }
    }

    /// Attaches a session token to every subsequent request.
    pub fn set_token(&self, token: String) {
        if let Ok(mut guard) = self.auth_token.write() {
            *guard = Some(token);
        }
    }

    /// Reverts to anonymous demo mode.
    pub fn clear_token(&self) {
        if let Ok(mut guard) = self.auth_token.write() {
            *guard = None;
        }
    }

    fn token(&self) -> Option<String> {
        self.auth_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, BackendError> {
        let mut request = self.client.get(self.endpoint(path));
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        decode_response(response).await
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let mut request = self.client.post(self.endpoint(path)).json(body);
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        decode_response(response).await
    }
}

#[async_trait]
impl ChatBackend for HttpBackendClient {
    async fn ping(&self) -> Result<PingResponse, BackendError> {
        debug!("pinging backend");
        self.get_json("/ping").await
    }

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        debug!(
            user_id = %request.user_id,
            language = %request.language,
            conversation_id = ?request.conversation_id,
            "sending chat message"
        );
        self.post_json("/api/chat", request).await
    }

    async fn create_thread(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<CreatedThread, BackendError> {
        debug!(user_id, title, "creating thread");
        self.post_json(
            "/api/threads",
            &serde_json::json!({ "user_id": user_id, "title": title }),
        )
        .await
    }

    async fn user_threads(&self, user_id: &str) -> Result<Vec<Thread>, BackendError> {
        debug!(user_id, "fetching thread index");
        self.get_json(&format!("/api/threads/{user_id}")).await
    }

    async fn thread_messages(
        &self,
        conversation_id: &str,
    ) -> Result<ThreadMessages, BackendError> {
        debug!(conversation_id, "fetching thread history");
        self.get_json(&format!("/api/threads/{conversation_id}/messages"))
            .await
    }

    fn audio_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn map_transport_error(error: reqwest::Error) -> BackendError {
    BackendError::Network(error.to_string())
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "backend request failed");
        return Err(BackendError::Http {
            status: status.as_u16(),
            message: extract_error_detail(&body),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|error| BackendError::InvalidResponse(error.to_string()))
}

fn extract_error_detail(raw_body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        detail: String,
    }

    serde_json::from_str::<ErrorEnvelope>(raw_body)
        .map(|envelope| envelope.detail)
        .unwrap_or_else(|_| raw_body.trim().to_string())
}

fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<u64>().ok())
}

fn build_client(config: &BackendConfig) -> Client {
    let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
    debug!(timeout_secs = timeout.as_secs(), "building backend HTTP client");
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("backend client construction should succeed")
}
