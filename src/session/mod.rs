use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    ChatBackend, ChatRequest, ChatResponse, RecordFlags, RecordSender, Thread,
    ThreadMessageRecord, NO_AUDIO_SENTINEL,
};

pub const WELCOME_TEXT: &str = "Hi! I'm Manny, your SLCM assistant. I can help you with library, cafeteria, admission, hostel, fees, transport, placement, and academic queries. What would you like to know today?";
pub const NEW_THREAD_WELCOME_TEXT: &str =
    "Hi! I'm Manny, your SLCM assistant. How can I help you today?";
pub const CLEARED_CHAT_WELCOME_TEXT: &str =
    "Chat cleared! I'm Manny, your SLCM assistant. How can I help you today?";
pub const SEND_FALLBACK_TEXT: &str =
    "Sorry, I encountered an error. Please try again or check your connection.";

pub const CONNECT_ERROR_TEXT: &str =
    "Failed to connect to backend server. Please ensure the server is running.";
pub const SEND_ERROR_TEXT: &str = "Failed to send message. Please try again.";
pub const LOAD_THREAD_ERROR_TEXT: &str = "Failed to load conversation thread";
pub const CREATE_THREAD_ERROR_TEXT: &str = "Failed to create new conversation";

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

/// Subset of the backend response flags that the widget surfaces per message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFlags {
    pub confidence_score: f64,
    pub category: String,
    pub sentiment: String,
}

/// One turn of the conversation as held in session state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<crate::backend::Source>,
    pub audio_url: Option<String>,
    pub flags: Option<MessageFlags>,
}

impl ChatMessage {
    fn welcome(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            sender: Sender::Bot,
            timestamp: Utc::now(),
            sources: Vec::new(),
            audio_url: None,
            flags: None,
        }
    }

    fn user(text: &str) -> Self {
        Self {
            id: format!("user-{}", Uuid::new_v4()),
            text: text.to_string(),
            sender: Sender::User,
            timestamp: Utc::now(),
            sources: Vec::new(),
            audio_url: None,
            flags: None,
        }
    }

    fn send_fallback() -> Self {
        Self {
            id: format!("error-{}", Uuid::new_v4()),
            text: SEND_FALLBACK_TEXT.to_string(),
            sender: Sender::Bot,
            timestamp: Utc::now(),
            sources: Vec::new(),
            audio_url: None,
            flags: None,
        }
    }
}

/// Read-only copy of the session state handed to presentation layers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub current_conversation_id: Option<String>,
    pub is_connected: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub threads: Vec<Thread>,
    pub language: String,
}

#[derive(Debug)]
struct SessionState {
    messages: Vec<ChatMessage>,
    current_conversation_id: Option<String>,
    is_connected: bool,
    is_loading: bool,
    error: Option<String>,
    threads: Vec<Thread>,
    language: String,
    // Bumped whenever the session is reset or rebound so that responses from
    // an abandoned operation are discarded instead of applied to the wrong
    // thread.
    epoch: u64,
}

/// Authoritative owner of the conversation state. All mutations go through
/// the operations below; everything else reads cloned snapshots.
///
/// Send and thread-load operations are serialized by the `is_loading` gate,
/// so at most one backend-mutating request is in flight at a time.
pub struct SessionController {
    backend: Arc<dyn ChatBackend>,
    user_id: String,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl SessionController {
    pub fn new(backend: Arc<dyn ChatBackend>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            state: Mutex::new(SessionState {
                messages: vec![ChatMessage::welcome("welcome", WELCOME_TEXT)],
                current_conversation_id: None,
                is_connected: false,
                is_loading: false,
                error: None,
                threads: Vec::new(),
                language: DEFAULT_LANGUAGE.to_string(),
                epoch: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state lock poisoned")
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            messages: state.messages.clone(),
            current_conversation_id: state.current_conversation_id.clone(),
            is_connected: state.is_connected,
            is_loading: state.is_loading,
            error: state.error.clone(),
            threads: state.threads.clone(),
            language: state.language.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn set_language(&self, language: impl Into<String>) {
        self.lock().language = language.into();
    }

    /// Probes backend reachability and, when reachable, loads the thread
    /// index. Also serves as the manual refresh affordance after a
    /// connectivity failure; it never retries on its own.
    pub async fn initialize(&self) {
        match self.backend.ping().await {
            Ok(ping) => {
                info!(status = %ping.status, version = %ping.version, "backend reachable");
                {
                    let mut state = self.lock();
                    state.is_connected = true;
                    state.error = None;
                }
                self.refresh_threads().await;
            }
            Err(error) => {
                warn!(%error, "backend reachability probe failed");
                let mut state = self.lock();
                state.is_connected = false;
                state.error = Some(CONNECT_ERROR_TEXT.to_string());
            }
        }
    }

    /// Reloads the user's thread index. Failures are logged, never surfaced;
    /// the index is advisory.
    pub async fn refresh_threads(&self) {
        match self.backend.user_threads(&self.user_id).await {
            Ok(threads) => {
                debug!(count = threads.len(), "thread index refreshed");
                self.lock().threads = threads;
            }
            Err(error) => warn!(%error, "failed to load thread index"),
        }
    }

    /// Sends a user message, appending it optimistically before the backend
    /// confirms. A failed send keeps the optimistic message visible so the
    /// user can retry by resending.
    pub async fn send_message(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let (conversation_id, language, epoch) = {
            let mut state = self.lock();
            if state.is_loading || !state.is_connected {
                debug!(
                    is_loading = state.is_loading,
                    is_connected = state.is_connected,
                    "ignoring send while session is busy or offline"
                );
                return;
            }
            state.messages.push(ChatMessage::user(trimmed));
            state.is_loading = true;
            state.error = None;
            (
                state.current_conversation_id.clone(),
                state.language.clone(),
                state.epoch,
            )
        };

        let request = ChatRequest {
            user_id: self.user_id.clone(),
            message: trimmed.to_string(),
            language,
            conversation_id,
        };

        match self.backend.send_message(&request).await {
            Ok(response) => {
                {
                    let mut state = self.lock();
                    state.is_loading = false;
                    if state.epoch != epoch {
                        debug!(
                            conversation_id = %response.conversation_id,
                            "discarding chat response from an abandoned session"
                        );
                        return;
                    }
                    state
                        .messages
                        .push(self.bot_message_from_response(&response));
                    state.current_conversation_id = Some(response.conversation_id);
                }
                self.refresh_threads().await;
            }
            Err(error) => {
                warn!(%error, "chat send failed");
                let mut state = self.lock();
                state.is_loading = false;
                if state.epoch != epoch {
                    return;
                }
                state.messages.push(ChatMessage::send_fallback());
                state.error = Some(SEND_ERROR_TEXT.to_string());
            }
        }
    }

    /// Replaces the session's message list with the full history of the given
    /// thread. Prior messages are left untouched on failure.
    pub async fn load_thread(&self, conversation_id: &str) {
        let epoch = {
            let mut state = self.lock();
            if state.is_loading {
                debug!(conversation_id, "ignoring thread load while busy");
                return;
            }
            state.is_loading = true;
            state.error = None;
            state.epoch
        };

        match self.backend.thread_messages(conversation_id).await {
            Ok(history) => {
                let mapped: Vec<ChatMessage> = history
                    .messages
                    .iter()
                    .map(|record| self.map_record(record))
                    .collect();

                let mut state = self.lock();
                state.is_loading = false;
                if state.epoch != epoch {
                    debug!(conversation_id, "discarding stale thread history");
                    return;
                }
                info!(
                    conversation_id = %history.conversation_id,
                    messages = mapped.len(),
                    "thread history loaded"
                );
                state.messages = mapped;
                state.current_conversation_id = Some(history.conversation_id);
            }
            Err(error) => {
                warn!(conversation_id, %error, "failed to load thread history");
                let mut state = self.lock();
                state.is_loading = false;
                if state.epoch == epoch {
                    state.error = Some(LOAD_THREAD_ERROR_TEXT.to_string());
                }
            }
        }
    }

    /// Creates a fresh persisted thread and resets the message list to a new
    /// welcome message. Returns the new conversation id on success.
    pub async fn create_new_thread(&self, title: Option<&str>) -> Option<String> {
        let thread_title = title
            .map(str::to_string)
            .unwrap_or_else(|| format!("Chat Session {}", Utc::now().format("%Y-%m-%d")));
        let epoch = self.lock().epoch;

        match self.backend.create_thread(&self.user_id, &thread_title).await {
            Ok(created) => {
                {
                    let mut state = self.lock();
                    if state.epoch != epoch {
                        debug!(
                            conversation_id = %created.conversation_id,
                            "discarding thread creation from an abandoned session"
                        );
                        return None;
                    }
                    info!(conversation_id = %created.conversation_id, title = %thread_title, "thread created");
                    state.messages =
                        vec![ChatMessage::welcome("welcome-new", NEW_THREAD_WELCOME_TEXT)];
                    state.current_conversation_id = Some(created.conversation_id.clone());
                    state.error = None;
                    state.epoch += 1;
                }
                self.refresh_threads().await;
                Some(created.conversation_id)
            }
            Err(error) => {
                warn!(%error, "failed to create thread");
                let mut state = self.lock();
                if state.epoch == epoch {
                    state.error = Some(CREATE_THREAD_ERROR_TEXT.to_string());
                }
                None
            }
        }
    }

    /// Local-only reset: single welcome message, no bound thread, no backend
    /// call. Idempotent.
    pub fn clear_chat(&self) {
        let mut state = self.lock();
        state.messages = vec![ChatMessage::welcome(
            "welcome-clear",
            CLEARED_CHAT_WELCOME_TEXT,
        )];
        state.current_conversation_id = None;
        state.error = None;
        state.epoch += 1;
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    fn bot_message_from_response(&self, response: &ChatResponse) -> ChatMessage {
        ChatMessage {
            id: format!("bot-{}", Uuid::new_v4()),
            text: response.response.clone(),
            sender: Sender::Bot,
            timestamp: Utc::now(),
            sources: response.sources.clone(),
            audio_url: response
                .tts_audio_url
                .as_deref()
                .map(|path| self.backend.audio_url(path)),
            flags: Some(MessageFlags {
                confidence_score: response.flags.confidence_score,
                category: response.flags.category.clone(),
                sentiment: response.flags.sentiment.clone(),
            }),
        }
    }

    /// Maps a persisted thread record into a session message. User records
    /// display their query, assistant records their response text.
    fn map_record(&self, record: &ThreadMessageRecord) -> ChatMessage {
        let (sender, text) = match record.sender {
            RecordSender::User => (Sender::User, record.user_query.clone()),
            RecordSender::Assistant => (Sender::Bot, record.response_text.clone()),
        };

        let audio_url = if record.tts_audio_path.is_empty()
            || record.tts_audio_path == NO_AUDIO_SENTINEL
        {
            None
        } else {
            Some(self.backend.audio_url(&record.tts_audio_path))
        };

        let flags = match &record.flags {
            RecordFlags::Scored(flags) => Some(MessageFlags {
                confidence_score: flags.confidence_score,
                category: flags.category.clone(),
                sentiment: flags.sentiment.clone(),
            }),
            RecordFlags::Safety { .. } => None,
        };

        ChatMessage {
            id: record.log_id.clone(),
            text,
            sender,
            timestamp: DateTime::parse_from_rfc3339(&record.timestamp)
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            sources: record.sources.clone().unwrap_or_default(),
            audio_url,
            flags,
        }
    }
}
