//! Client core for the Manny conversational assistant.
//!
//! The crate centers on a [`session::SessionController`] that owns the
//! message transcript and talks to the assistant backend through the
//! [`backend::ChatBackend`] trait. Voice capture and playback are handled by
//! [`speech_input::SpeechInputController`] and
//! [`speech_output::SpeechOutputController`] over injected platform
//! primitives, and [`widget::ChatWidget`] composes the lot behind the
//! floating/docked/fullscreen presentation chrome.

pub mod backend;
pub mod logging;
pub mod session;
pub mod speech_input;
pub mod speech_output;
pub mod widget;

pub use backend::{BackendConfig, ChatBackend, HttpBackendClient};
pub use session::{ChatMessage, Sender, SessionController, SessionSnapshot};
pub use speech_input::{SpeechInputController, SpeechRecognizer};
pub use speech_output::{AudioPlayer, SpeechOutputController, SpeechSynthesizer};
pub use widget::{ChatSurface, ChatWidget};
