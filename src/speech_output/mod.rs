use tracing::{debug, warn};

use crate::session::{ChatMessage, Sender};

pub const SYNTHESIS_RATE: f32 = 0.9;
pub const SYNTHESIS_PITCH: f32 = 1.0;
pub const SYNTHESIS_VOLUME: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Platform text-to-speech primitive. There is a single synthesis channel;
/// the controller owns it and always cancels before speaking.
pub trait SpeechSynthesizer: Send {
    fn speak(&mut self, utterance: &Utterance) -> Result<(), String>;
    fn cancel(&mut self);
}

/// Playback channel for server-rendered audio assets, independent of the
/// synthesis channel.
pub trait AudioPlayer: Send {
    fn play(&mut self, url: &str) -> Result<(), String>;
}

/// Process-scoped cache of the synthesis voices the platform currently
/// offers. The platform binding pushes updates through
/// [`SpeechOutputController::on_voices_changed`]; nothing mutates the list in
/// place.
#[derive(Debug, Default)]
pub struct VoiceCatalog {
    voices: Vec<VoiceInfo>,
}

impl VoiceCatalog {
    pub fn voices(&self) -> &[VoiceInfo] {
        &self.voices
    }

    fn refresh(&mut self, voices: Vec<VoiceInfo>) {
        debug!(count = voices.len(), "synthesis voice list refreshed");
        self.voices = voices;
    }

    fn contains(&self, name: &str) -> bool {
        self.voices.iter().any(|voice| voice.name == name)
    }

    fn first_for_language(&self, primary_subtag: &str) -> Option<&VoiceInfo> {
        self.voices
            .iter()
            .find(|voice| primary_language_subtag(&voice.locale) == primary_subtag)
    }
}

/// Renders bot turns to audio: server-supplied assets when present, local
/// synthesis otherwise, with synthesis as the fallback when playback fails.
pub struct SpeechOutputController {
    synthesizer: Box<dyn SpeechSynthesizer>,
    player: Box<dyn AudioPlayer>,
    catalog: VoiceCatalog,
    enabled: bool,
    selected_voice: Option<String>,
    speech_locale: String,
}

impl std::fmt::Debug for SpeechOutputController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOutputController")
            .field("enabled", &self.enabled)
            .field("selected_voice", &self.selected_voice)
            .field("speech_locale", &self.speech_locale)
            .finish()
    }
}

impl SpeechOutputController {
    pub fn new(synthesizer: Box<dyn SpeechSynthesizer>, player: Box<dyn AudioPlayer>) -> Self {
        Self {
            synthesizer,
            player,
            catalog: VoiceCatalog::default(),
            enabled: true,
            selected_voice: None,
            speech_locale: "en-US".to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggles synthesis. Disabling cancels anything currently speaking;
    /// server-audio playback is unaffected by this flag.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.synthesizer.cancel();
        }
        self.enabled = enabled;
    }

    pub fn set_voice(&mut self, voice: Option<String>) {
        self.selected_voice = voice;
    }

    pub fn set_speech_locale(&mut self, locale: &str) {
        self.speech_locale = locale.to_string();
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    /// Voice-list-changed event from the platform.
    pub fn on_voices_changed(&mut self, voices: Vec<VoiceInfo>) {
        self.catalog.refresh(voices);
    }

    /// Renders one message. Server audio takes priority; playback failure
    /// degrades to synthesis; synthesis of non-bot turns is never attempted.
    pub fn render(&mut self, message: &ChatMessage) {
        if let Some(url) = &message.audio_url {
            match self.player.play(url) {
                Ok(()) => debug!(%url, "playing server audio"),
                Err(error) => {
                    warn!(%url, %error, "server audio playback failed; falling back to synthesis");
                    self.synthesize(&message.text);
                }
            }
            return;
        }

        if message.sender == Sender::Bot {
            self.synthesize(&message.text);
        }
    }

    fn synthesize(&mut self, text: &str) {
        if !self.enabled || text.trim().is_empty() {
            return;
        }

        // Single synthesis channel: stop whatever is speaking first.
        self.synthesizer.cancel();

        let utterance = Utterance {
            text: text.to_string(),
            voice: self.select_voice(),
            rate: SYNTHESIS_RATE,
            pitch: SYNTHESIS_PITCH,
            volume: SYNTHESIS_VOLUME,
        };

        if let Err(error) = self.synthesizer.speak(&utterance) {
            warn!(%error, "speech synthesis failed");
        }
    }

    /// Selection order: the user's explicit voice if still offered, then the
    /// first voice matching the active language, then the platform default.
    fn select_voice(&self) -> Option<String> {
        if let Some(selected) = &self.selected_voice {
            if self.catalog.contains(selected) {
                return Some(selected.clone());
            }
        }

        self.catalog
            .first_for_language(primary_language_subtag(&self.speech_locale))
            .map(|voice| voice.name.clone())
    }
}

fn primary_language_subtag(locale: &str) -> &str {
    locale.split('-').next().unwrap_or(locale)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::*;

    #[derive(Debug, Default)]
    struct CallLog {
        calls: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn push(&self, call: String) {
            self.calls
                .lock()
                .expect("call log lock should not be poisoned")
                .push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("call log lock should not be poisoned")
                .clone()
        }
    }

    struct MockSynthesizer {
        log: Arc<CallLog>,
    }

    impl SpeechSynthesizer for MockSynthesizer {
        fn speak(&mut self, utterance: &Utterance) -> Result<(), String> {
            self.log.push(format!(
                "speak:{}:{}",
                utterance.text,
                utterance.voice.as_deref().unwrap_or("default")
            ));
            Ok(())
        }

        fn cancel(&mut self) {
            self.log.push("cancel".to_string());
        }
    }

    struct MockPlayer {
        log: Arc<CallLog>,
        play_result: Result<(), String>,
    }

    impl AudioPlayer for MockPlayer {
        fn play(&mut self, url: &str) -> Result<(), String> {
            self.log.push(format!("play:{url}"));
            self.play_result.clone()
        }
    }

    fn controller_with_logs(
        play_result: Result<(), String>,
    ) -> (SpeechOutputController, Arc<CallLog>, Arc<CallLog>) {
        let synth_log = Arc::new(CallLog::default());
        let player_log = Arc::new(CallLog::default());
        let controller = SpeechOutputController::new(
            Box::new(MockSynthesizer {
                log: synth_log.clone(),
            }),
            Box::new(MockPlayer {
                log: player_log.clone(),
                play_result,
            }),
        );
        (controller, synth_log, player_log)
    }

    fn bot_message(text: &str, audio_url: Option<&str>) -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            text: text.to_string(),
            sender: Sender::Bot,
            timestamp: Utc::now(),
            sources: Vec::new(),
            audio_url: audio_url.map(ToString::to_string),
            flags: None,
        }
    }

    #[test]
    fn bot_message_without_audio_is_synthesized() {
        let (mut controller, synth_log, player_log) = controller_with_logs(Ok(()));

        controller.render(&bot_message("Hello!", None));

        assert_eq!(
            synth_log.calls(),
            vec!["cancel".to_string(), "speak:Hello!:default".to_string()]
        );
        assert!(player_log.calls().is_empty());
    }

    #[test]
    fn disabled_synthesis_renders_nothing_without_error() {
        let (mut controller, synth_log, player_log) = controller_with_logs(Ok(()));

        controller.set_enabled(false);
        synth_log.calls.lock().expect("lock").clear();
        controller.render(&bot_message("Hello!", None));

        assert!(synth_log.calls().is_empty());
        assert!(player_log.calls().is_empty());
    }

    #[test]
    fn disabling_cancels_in_flight_synthesis() {
        let (mut controller, synth_log, _) = controller_with_logs(Ok(()));

        controller.render(&bot_message("Hello!", None));
        controller.set_enabled(false);

        let calls = synth_log.calls();
        assert_eq!(calls.last().map(String::as_str), Some("cancel"));
    }

    #[test]
    fn each_synthesis_cancels_the_previous_utterance() {
        let (mut controller, synth_log, _) = controller_with_logs(Ok(()));

        controller.render(&bot_message("first", None));
        controller.render(&bot_message("second", None));

        assert_eq!(
            synth_log.calls(),
            vec![
                "cancel".to_string(),
                "speak:first:default".to_string(),
                "cancel".to_string(),
                "speak:second:default".to_string(),
            ]
        );
    }

    #[test]
    fn server_audio_plays_on_its_own_channel() {
        let (mut controller, synth_log, player_log) = controller_with_logs(Ok(()));

        controller.render(&bot_message("Hello!", Some("http://b/static/a.mp3")));

        assert_eq!(
            player_log.calls(),
            vec!["play:http://b/static/a.mp3".to_string()]
        );
        assert!(synth_log.calls().is_empty());
    }

    #[test]
    fn server_audio_ignores_the_tts_flag() {
        let (mut controller, synth_log, player_log) = controller_with_logs(Ok(()));

        controller.set_enabled(false);
        synth_log.calls.lock().expect("lock").clear();
        controller.render(&bot_message("Hello!", Some("http://b/static/a.mp3")));

        assert_eq!(player_log.calls().len(), 1);
        assert!(synth_log.calls().is_empty());
    }

    #[test]
    fn playback_failure_falls_back_to_synthesis() {
        let (mut controller, synth_log, player_log) =
            controller_with_logs(Err("decode error".to_string()));

        controller.render(&bot_message("Hello!", Some("http://b/static/a.mp3")));

        assert_eq!(player_log.calls().len(), 1);
        assert_eq!(
            synth_log.calls(),
            vec!["cancel".to_string(), "speak:Hello!:default".to_string()]
        );
    }

    #[test]
    fn playback_failure_with_synthesis_disabled_degrades_silently() {
        let (mut controller, synth_log, player_log) =
            controller_with_logs(Err("decode error".to_string()));

        controller.set_enabled(false);
        synth_log.calls.lock().expect("lock").clear();
        controller.render(&bot_message("Hello!", Some("http://b/static/a.mp3")));

        assert_eq!(player_log.calls().len(), 1);
        assert!(synth_log.calls().is_empty());
    }

    #[test]
    fn user_messages_are_never_synthesized() {
        let (mut controller, synth_log, _) = controller_with_logs(Ok(()));
        let message = ChatMessage {
            sender: Sender::User,
            ..bot_message("typed text", None)
        };

        controller.render(&message);

        assert!(synth_log.calls().is_empty());
    }

    #[test]
    fn explicit_voice_wins_while_still_available() {
        let (mut controller, synth_log, _) = controller_with_logs(Ok(()));
        controller.on_voices_changed(vec![
            VoiceInfo {
                name: "Rishi".to_string(),
                locale: "hi-IN".to_string(),
            },
            VoiceInfo {
                name: "Samantha".to_string(),
                locale: "en-US".to_string(),
            },
        ]);
        controller.set_voice(Some("Rishi".to_string()));

        controller.render(&bot_message("Hello!", None));

        assert_eq!(
            synth_log.calls().last().map(String::as_str),
            Some("speak:Hello!:Rishi")
        );
    }

    #[test]
    fn missing_selection_falls_back_to_language_match() {
        let (mut controller, synth_log, _) = controller_with_logs(Ok(()));
        controller.on_voices_changed(vec![
            VoiceInfo {
                name: "Rishi".to_string(),
                locale: "hi-IN".to_string(),
            },
            VoiceInfo {
                name: "Samantha".to_string(),
                locale: "en-US".to_string(),
            },
        ]);
        controller.set_voice(Some("Ghost".to_string()));
        controller.set_speech_locale("en-GB");

        controller.render(&bot_message("Hello!", None));

        assert_eq!(
            synth_log.calls().last().map(String::as_str),
            Some("speak:Hello!:Samantha")
        );
    }

    #[test]
    fn empty_catalog_uses_the_platform_default() {
        let (mut controller, synth_log, _) = controller_with_logs(Ok(()));

        controller.render(&bot_message("Hello!", None));

        assert_eq!(
            synth_log.calls().last().map(String::as_str),
            Some("speak:Hello!:default")
        );
    }

    #[test]
    fn voice_list_refresh_replaces_the_catalog() {
        let (mut controller, _, _) = controller_with_logs(Ok(()));
        controller.on_voices_changed(vec![VoiceInfo {
            name: "Old".to_string(),
            locale: "en-US".to_string(),
        }]);

        controller.on_voices_changed(vec![VoiceInfo {
            name: "New".to_string(),
            locale: "en-US".to_string(),
        }]);

        let names: Vec<&str> = controller
            .catalog()
            .voices()
            .iter()
            .map(|voice| voice.name.as_str())
            .collect();
        assert_eq!(names, vec!["New"]);
    }
}
