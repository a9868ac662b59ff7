use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::session::{ChatMessage, SessionController};
use crate::speech_input::{append_to_draft, SpeechInputController};
use crate::speech_output::SpeechOutputController;

/// Presentation mode of the chat widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatSurface {
    /// Collapsed launcher button.
    Floating,
    /// Compact panel anchored to a screen corner.
    Docked,
    /// Full session view with the thread sidebar.
    Fullscreen,
}

impl fmt::Display for ChatSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatSurface::Floating => write!(f, "floating"),
            ChatSurface::Docked => write!(f, "docked"),
            ChatSurface::Fullscreen => write!(f, "fullscreen"),
        }
    }
}

impl ChatSurface {
    /// Returns whether an explicit user action may move the widget from
    /// `self` to `target`. There are no automatic transitions.
    pub fn can_transition_to(&self, target: &ChatSurface) -> bool {
        matches!(
            (self, target),
            (ChatSurface::Floating, ChatSurface::Docked)
                | (ChatSurface::Docked, ChatSurface::Fullscreen)
                | (ChatSurface::Docked, ChatSurface::Floating)
                | (ChatSurface::Fullscreen, ChatSurface::Docked)
                | (ChatSurface::Fullscreen, ChatSurface::Floating)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageOption {
    pub code: &'static str,
    pub name: &'static str,
    pub speech_locale: &'static str,
}

pub const LANGUAGE_OPTIONS: [LanguageOption; 3] = [
    LanguageOption {
        code: "en-US",
        name: "English",
        speech_locale: "en-US",
    },
    LanguageOption {
        code: "hi-IN",
        name: "हिंदी",
        speech_locale: "hi-IN",
    },
    LanguageOption {
        code: "ml-IN",
        name: "മലയാളം",
        speech_locale: "ml-IN",
    },
];

pub fn language_option(code: &str) -> Option<&'static LanguageOption> {
    LANGUAGE_OPTIONS.iter().find(|option| option.code == code)
}

fn primary_subtag(code: &str) -> &str {
    code.split('-').next().unwrap_or(code)
}

/// Composes one shared session controller with the speech controllers and
/// the presentation flags. A pure view-mode selector over the session: the
/// same messages render under every surface, and this type never mutates
/// session fields directly.
///
/// Presentation state lives and dies with the widget instance; switching
/// threads leaves it untouched.
pub struct ChatWidget {
    session: Arc<SessionController>,
    speech_input: SpeechInputController,
    speech_output: SpeechOutputController,
    surface: ChatSurface,
    show_sidebar: bool,
    narrow_viewport: bool,
    draft: String,
    selected_language: &'static LanguageOption,
}

impl fmt::Debug for ChatWidget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatWidget")
            .field("surface", &self.surface)
            .field("show_sidebar", &self.show_sidebar)
            .field("selected_language", &self.selected_language.code)
            .finish()
    }
}

impl ChatWidget {
    pub fn new(
        session: Arc<SessionController>,
        speech_input: SpeechInputController,
        speech_output: SpeechOutputController,
    ) -> Self {
        Self {
            session,
            speech_input,
            speech_output,
            surface: ChatSurface::Floating,
            show_sidebar: true,
            narrow_viewport: false,
            draft: String::new(),
            selected_language: &LANGUAGE_OPTIONS[0],
        }
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    /// Platform bindings deliver recognition events through this handle.
    pub fn speech_input_mut(&mut self) -> &mut SpeechInputController {
        &mut self.speech_input
    }

    /// Platform bindings deliver voice-list updates through this handle.
    pub fn speech_output_mut(&mut self) -> &mut SpeechOutputController {
        &mut self.speech_output
    }

    pub fn surface(&self) -> ChatSurface {
        self.surface
    }

    pub fn show_sidebar(&self) -> bool {
        self.show_sidebar
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn selected_language(&self) -> &'static LanguageOption {
        self.selected_language
    }

    pub fn speech_status(&self) -> Option<&str> {
        self.speech_input.status()
    }

    pub fn is_recording(&self) -> bool {
        self.speech_input.is_listening()
    }

    pub fn set_narrow_viewport(&mut self, narrow: bool) {
        self.narrow_viewport = narrow;
    }

    /// Requests a surface change. Invalid transitions are rejected and leave
    /// the widget where it was.
    pub fn transition_to(&mut self, target: ChatSurface) -> bool {
        if self.surface.can_transition_to(&target) {
            debug!(from = %self.surface, to = %target, "widget surface changed");
            self.surface = target;
            true
        } else {
            debug!(from = %self.surface, to = %target, "rejected widget surface change");
            false
        }
    }

    /// Sidebar visibility is only meaningful in fullscreen.
    pub fn toggle_sidebar(&mut self) {
        if self.surface == ChatSurface::Fullscreen {
            self.show_sidebar = !self.show_sidebar;
        }
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Drains any captured voice transcript into the input draft, appending
    /// after already-typed text.
    pub fn collect_transcript(&mut self) {
        if let Some(transcript) = self.speech_input.take_transcript() {
            self.draft = append_to_draft(&self.draft, &transcript);
        }
    }

    /// Dispatches the current draft through the session's send path. Typed
    /// and voice-transcribed input are indistinguishable here.
    pub async fn submit(&mut self) {
        if self.draft.trim().is_empty() || self.session.is_loading() {
            return;
        }
        let text = self.draft.clone();
        self.session.send_message(&text).await;
        self.draft.clear();
    }

    /// Loads a thread picked from the sidebar. Only reachable in fullscreen;
    /// on a narrow viewport the sidebar collapses after selection.
    pub async fn select_thread(&mut self, conversation_id: &str) {
        if self.surface != ChatSurface::Fullscreen {
            debug!(conversation_id, surface = %self.surface, "thread selection ignored outside fullscreen");
            return;
        }
        self.session.load_thread(conversation_id).await;
        self.collapse_sidebar_when_narrow();
    }

    /// Starts a fresh thread from the fullscreen view.
    pub async fn new_thread(&mut self) {
        if self.surface != ChatSurface::Fullscreen {
            return;
        }
        self.session.create_new_thread(None).await;
        self.collapse_sidebar_when_narrow();
    }

    pub fn clear_chat(&mut self) {
        self.session.clear_chat();
        self.collapse_sidebar_when_narrow();
    }

    /// Toggles voice capture. Recognition may not start while a send or
    /// thread load is outstanding, or while the backend is unreachable;
    /// stopping is always allowed.
    pub fn toggle_recording(&mut self) {
        if self.speech_input.is_listening() {
            self.speech_input.stop();
            return;
        }
        if !self.session.is_connected() || self.session.is_loading() {
            debug!("recognition start blocked while session is busy or offline");
            return;
        }
        self.speech_input.start();
    }

    /// Switches the active language across the session, the recognizer, and
    /// the synthesis locale. Unknown codes are ignored.
    pub fn set_language(&mut self, code: &str) -> bool {
        let Some(option) = language_option(code) else {
            debug!(code, "unknown language code");
            return false;
        };
        self.selected_language = option;
        self.session.set_language(primary_subtag(option.code));
        self.speech_input.set_language(option.code, option.name);
        self.speech_output.set_speech_locale(option.speech_locale);
        true
    }

    pub fn set_tts_enabled(&mut self, enabled: bool) {
        self.speech_output.set_enabled(enabled);
    }

    /// Plays one message on request (the per-message speaker affordance).
    pub fn play_message(&mut self, message: &ChatMessage) {
        self.speech_output.render(message);
    }

    fn collapse_sidebar_when_narrow(&mut self) {
        if self.narrow_viewport && self.show_sidebar {
            self.show_sidebar = false;
        }
    }
}
