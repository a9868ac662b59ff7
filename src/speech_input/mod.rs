use std::time::{Duration, Instant};

use tracing::{debug, warn};

const DEFAULT_CAPTURED_CLEAR_MS: u64 = 2_000;
const DEFAULT_ERROR_CLEAR_MS: u64 = 3_000;

pub const UNSUPPORTED_STATUS: &str = "Speech recognition not supported";
pub const CAPTURED_STATUS: &str = "Text captured!";
pub const RECOGNITION_ERROR_STATUS: &str = "Error: Could not recognize speech";

/// Platform speech recognition primitive. Production binds this to the host
/// recognizer; tests substitute a mock.
pub trait SpeechRecognizer: Send {
    fn configure(&mut self, language: &str);
    fn start(&mut self) -> Result<(), String>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningPhase {
    Idle,
    Listening,
}

#[derive(Debug, Clone)]
struct StatusLine {
    text: String,
    expires_at: Option<Instant>,
}

/// Idle/listening state machine over an injected recognizer. Final
/// transcripts are staged here and drained by the widget into its input
/// draft; they never bypass the normal send path.
pub struct SpeechInputController {
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    phase: ListeningPhase,
    language: String,
    language_name: String,
    status: Option<StatusLine>,
    pending_transcript: Option<String>,
    captured_clear_delay: Duration,
    error_clear_delay: Duration,
}

impl std::fmt::Debug for SpeechInputController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechInputController")
            .field("phase", &self.phase)
            .field("language", &self.language)
            .field("supported", &self.recognizer.is_some())
            .finish()
    }
}

impl SpeechInputController {
    pub fn new(recognizer: Option<Box<dyn SpeechRecognizer>>) -> Self {
        Self::with_status_delays(
            recognizer,
            Duration::from_millis(DEFAULT_CAPTURED_CLEAR_MS),
            Duration::from_millis(DEFAULT_ERROR_CLEAR_MS),
        )
    }

    pub fn with_status_delays(
        recognizer: Option<Box<dyn SpeechRecognizer>>,
        captured_clear_delay: Duration,
        error_clear_delay: Duration,
    ) -> Self {
        Self {
            recognizer,
            phase: ListeningPhase::Idle,
            language: "en-US".to_string(),
            language_name: "English".to_string(),
            status: None,
            pending_transcript: None,
            captured_clear_delay,
            error_clear_delay,
        }
    }

    pub fn phase(&self) -> ListeningPhase {
        self.phase
    }

    pub fn is_listening(&self) -> bool {
        self.phase == ListeningPhase::Listening
    }

    pub fn is_supported(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Current human-readable status, or `None` once it has expired.
    pub fn status(&self) -> Option<&str> {
        let line = self.status.as_ref()?;
        if let Some(expires_at) = line.expires_at {
            if Instant::now() >= expires_at {
                return None;
            }
        }
        Some(&line.text)
    }

    /// Starts a recognition session for the currently selected language.
    /// Missing platform support is not an error state; it only surfaces here,
    /// on the attempt to start.
    pub fn start(&mut self) {
        if self.phase == ListeningPhase::Listening {
            return;
        }

        let language = self.language.clone();
        let Some(recognizer) = self.recognizer.as_mut() else {
            debug!("speech recognition unavailable on this platform");
            self.set_status(UNSUPPORTED_STATUS, Some(self.error_clear_delay));
            return;
        };

        recognizer.configure(&language);
        match recognizer.start() {
            Ok(()) => {
                debug!(language = %self.language, "recognition started");
                self.phase = ListeningPhase::Listening;
                let text = format!("Listening in {}...", self.language_name);
                self.set_status(&text, None);
            }
            Err(message) => {
                warn!(%message, "failed to start recognition");
                self.set_status(RECOGNITION_ERROR_STATUS, Some(self.error_clear_delay));
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.stop();
        }
        self.phase = ListeningPhase::Idle;
        self.clear_listening_status();
    }

    /// Called by the platform binding when a final transcript arrives.
    pub fn on_transcript(&mut self, transcript: &str) {
        debug!(chars = transcript.len(), "transcript captured");
        self.phase = ListeningPhase::Idle;
        self.pending_transcript = Some(transcript.trim().to_string());
        self.set_status(CAPTURED_STATUS, Some(self.captured_clear_delay));
    }

    /// Called by the platform binding on a recognition error. Transient;
    /// typed input is never affected.
    pub fn on_error(&mut self, error: &str) {
        warn!(%error, "speech recognition error");
        self.phase = ListeningPhase::Idle;
        self.set_status(RECOGNITION_ERROR_STATUS, Some(self.error_clear_delay));
    }

    /// Called by the platform binding when the recognition session ends.
    pub fn on_end(&mut self) {
        self.phase = ListeningPhase::Idle;
        self.clear_listening_status();
    }

    /// Drains the most recent captured transcript, if any.
    pub fn take_transcript(&mut self) -> Option<String> {
        self.pending_transcript.take()
    }

    /// Selects the recognition language. A change while listening forces a
    /// stop before the recognizer is reconfigured; it never rebuilds a live
    /// session in place.
    pub fn set_language(&mut self, code: &str, display_name: &str) {
        if self.phase == ListeningPhase::Listening {
            debug!(code, "language changed while listening; stopping recognizer");
            self.stop();
        }
        self.language = code.to_string();
        self.language_name = display_name.to_string();
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.configure(code);
        }
    }

    fn set_status(&mut self, text: &str, clear_after: Option<Duration>) {
        self.status = Some(StatusLine {
            text: text.to_string(),
            expires_at: clear_after.map(|delay| Instant::now() + delay),
        });
    }

    fn clear_listening_status(&mut self) {
        if let Some(line) = &self.status {
            if line.text.starts_with("Listening") {
                self.status = None;
            }
        }
    }
}

/// Merges a captured transcript into text already staged for sending, with a
/// single separating space when the draft is non-empty.
pub fn append_to_draft(draft: &str, transcript: &str) -> String {
    if draft.is_empty() {
        transcript.to_string()
    } else {
        format!("{draft} {transcript}")
    }
}
