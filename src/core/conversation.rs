//! One chat turn at a time: stream a reply, cut it into sentences, speak it.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info};
use thiserror::Error;

use crate::core::config::{ConfigError, StudioConfig};
use crate::core::dispatch::{
    DispatchConfig, DispatchError, DispatchReport, PlaybackHooks, SpeechDispatcher,
};
use crate::core::ports::{Avatar, ChatError, ChatStreamSource, SpeechSynthesizer};
use crate::core::screenplay::compile;
use crate::core::splitter::{SentenceSplitter, SplitError};
use crate::core::tag::{extract_leading_tag, parse_leading_tag, strip_display_tags, TagMatch};
use crate::schema::emotion::Emotion;
use crate::schema::message::{Message, Role};
use crate::schema::screenplay::{ScreenplayUnit, SentenceUnit, VoiceParams};

/// Shown instead of a reply when no chat credential is configured.
pub const MISSING_CREDENTIAL_MESSAGE: &str = "No API key has been entered.";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("no chat credential configured")]
    MissingCredential,
    #[error("chat stream failed: {0}")]
    Stream(#[from] ChatError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("split rules error: {0}")]
    Split(#[from] SplitError),
    #[error("conversation needs a {0}")]
    MissingCollaborator(&'static str),
    #[error("no chat log message at index {0}")]
    NoSuchMessage(usize),
}

/// Receives display updates from a conversation.
///
/// Called from the turn task and from the playback worker, so
/// implementations must be cheap and thread-safe.
pub trait Presenter: Send + Sync {
    /// The caption currently being spoken, or a status message.
    fn show_assistant_message(&self, _text: &str) {}

    fn chat_log_changed(&self, _log: &[Message]) {}

    fn processing_changed(&self, _processing: bool) {}
}

/// A presenter that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {}

/// What a completed turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The assistant message appended to the chat log.
    pub transcript: String,
    /// Units handed to the dispatcher, in order.
    pub units: Vec<ScreenplayUnit>,
    /// Unterminated text left in the buffer when the stream ended.
    pub discarded_tail: Option<String>,
    pub report: DispatchReport,
}

/// A unit ready to speak plus the caption to show when it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub unit: ScreenplayUnit,
    pub caption: String,
}

/// Incremental reply state for a single turn.
///
/// Owns the text buffer and the emotion currently in effect; each pushed
/// chunk yields every sentence that became complete.
#[derive(Debug, Clone)]
pub struct ReplyAssembler {
    splitter: SentenceSplitter,
    voice: VoiceParams,
    buffer: String,
    emotion: Emotion,
    tagged: bool,
    sentences: Vec<String>,
    transcript: String,
    units: Vec<ScreenplayUnit>,
}

impl ReplyAssembler {
    pub fn new(splitter: SentenceSplitter, voice: VoiceParams) -> Self {
        Self {
            splitter,
            voice,
            buffer: String::new(),
            emotion: Emotion::Neutral,
            tagged: false,
            sentences: Vec::new(),
            transcript: String::new(),
            units: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Utterance> {
        self.buffer.push_str(chunk);
        let mut ready = Vec::new();
        loop {
            let unknown = match parse_leading_tag(&self.buffer) {
                TagMatch::Unrecognized { name } => Some(name.to_string()),
                TagMatch::None | TagMatch::Emotion { .. } => None,
            };
            if let Some(name) = unknown {
                // The markup stays in the buffer for display stripping.
                debug!("unknown tag [{name}], speaking as neutral");
                self.emotion = Emotion::Neutral;
            } else if let Some(emotion) = extract_leading_tag(&mut self.buffer) {
                self.emotion = emotion;
                self.tagged = true;
            }
            let Some(segment) = self.splitter.take_next(&mut self.buffer) else {
                break;
            };
            self.sentences.push(segment.text.clone());
            if !segment.speakable {
                debug!("dropping unspeakable fragment {:?}", segment.text);
                continue;
            }

            if self.tagged {
                self.transcript.push_str(&self.emotion.markup());
                self.transcript.push(' ');
            }
            self.transcript.push_str(&segment.text);

            let unit = compile(
                &SentenceUnit {
                    text: segment.text,
                    emotion: self.emotion,
                },
                self.voice,
            );
            self.units.push(unit.clone());
            ready.push(Utterance {
                unit,
                caption: strip_display_tags(&self.sentences.join(" ")),
            });
        }
        ready
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// End the reply: returns the transcript, the emitted units and any
    /// unterminated tail, which is never spoken.
    pub fn finish(self) -> (String, Vec<ScreenplayUnit>, Option<String>) {
        let tail = if self.buffer.trim().is_empty() {
            None
        } else {
            debug!("discarding unterminated tail {:?}", self.buffer);
            Some(self.buffer)
        };
        (self.transcript, self.units, tail)
    }
}

/// The chat log plus everything needed to voice the assistant's replies.
///
/// `run_turn` borrows the conversation mutably, so turns never overlap.
pub struct Conversation {
    system_prompt: String,
    default_system_prompt: String,
    voice: VoiceParams,
    history_window: usize,
    splitter: SentenceSplitter,
    credential: Option<String>,
    chat_log: Vec<Message>,
    dispatch: DispatchConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    avatar: Arc<dyn Avatar>,
    presenter: Arc<dyn Presenter>,
}

/// Builder for constructing a `Conversation`.
pub struct ConversationBuilder {
    config: Option<StudioConfig>,
    config_path: Option<String>,
    credential: Option<String>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    avatar: Option<Arc<dyn Avatar>>,
    presenter: Option<Arc<dyn Presenter>>,
    chat_log: Vec<Message>,
}

impl Conversation {
    pub fn builder() -> ConversationBuilder {
        ConversationBuilder {
            config: None,
            config_path: None,
            credential: None,
            synthesizer: None,
            avatar: None,
            presenter: None,
            chat_log: Vec::new(),
        }
    }

    /// Run one exchange: send `input`, speak the streamed reply and record it.
    ///
    /// Resolves once the reply has been fully played or skipped.
    pub async fn run_turn(
        &mut self,
        input: &str,
        source: &dyn ChatStreamSource,
    ) -> Result<TurnOutcome, TurnError> {
        let Some(credential) = self.credential.clone() else {
            self.presenter
                .show_assistant_message(MISSING_CREDENTIAL_MESSAGE);
            return Err(TurnError::MissingCredential);
        };

        self.presenter.processing_changed(true);
        self.chat_log.push(Message::user(input));
        self.presenter.chat_log_changed(&self.chat_log);

        let result = self.stream_reply(&credential, source).await;
        self.presenter.processing_changed(false);

        let (transcript, units, discarded_tail, dispatcher) = match result {
            Ok(parts) => parts,
            Err(e) => {
                error!("turn aborted: {e}");
                if let TurnError::Stream(ref chat) = e {
                    self.presenter
                        .show_assistant_message(&format!("Could not get a reply: {chat}"));
                }
                return Err(e);
            }
        };

        self.chat_log.push(Message::assistant(transcript.clone()));
        self.presenter.chat_log_changed(&self.chat_log);
        info!("turn finished with {} unit(s)", units.len());

        let report = dispatcher.finish().await?;
        Ok(TurnOutcome {
            transcript,
            units,
            discarded_tail,
            report,
        })
    }

    async fn stream_reply(
        &self,
        credential: &str,
        source: &dyn ChatStreamSource,
    ) -> Result<(String, Vec<ScreenplayUnit>, Option<String>, SpeechDispatcher), TurnError> {
        let request = self.request_messages();
        let mut stream = source.open(&request, credential).await?;

        let dispatcher = SpeechDispatcher::new(
            Arc::clone(&self.synthesizer),
            Arc::clone(&self.avatar),
            &self.dispatch,
        )?;
        let mut reply = ReplyAssembler::new(self.splitter.clone(), self.voice);

        while let Some(chunk) = stream.next().await {
            // Dropping the dispatcher on error cancels any queued speech.
            let chunk = chunk?;
            for utterance in reply.push(&chunk) {
                let presenter = Arc::clone(&self.presenter);
                let caption = utterance.caption;
                dispatcher.enqueue(
                    utterance.unit,
                    PlaybackHooks::on_start(move || presenter.show_assistant_message(&caption)),
                )?;
            }
        }

        let (transcript, units, tail) = reply.finish();
        Ok((transcript, units, tail, dispatcher))
    }

    /// The system prompt followed by the most recent `history_window` messages.
    pub fn request_messages(&self) -> Vec<Message> {
        let start = self.chat_log.len().saturating_sub(self.history_window);
        let mut messages = Vec::with_capacity(self.chat_log.len() - start + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(&self.chat_log[start..]);
        messages
    }

    pub fn chat_log(&self) -> &[Message] {
        &self.chat_log
    }

    /// The chat log as shown to viewers, with tag markup removed.
    pub fn display_log(&self) -> Vec<Message> {
        self.chat_log
            .iter()
            .map(|m| Message {
                role: m.role,
                content: strip_display_tags(&m.content),
            })
            .collect()
    }

    pub fn edit_message(&mut self, index: usize, text: &str) -> Result<(), TurnError> {
        let message = self
            .chat_log
            .get_mut(index)
            .ok_or(TurnError::NoSuchMessage(index))?;
        message.content = text.to_string();
        self.presenter.chat_log_changed(&self.chat_log);
        Ok(())
    }

    pub fn reset_chat_log(&mut self) {
        self.chat_log.clear();
        self.presenter.chat_log_changed(&self.chat_log);
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn reset_system_prompt(&mut self) {
        self.system_prompt = self.default_system_prompt.clone();
    }

    pub fn voice(&self) -> VoiceParams {
        self.voice
    }

    pub fn set_voice(&mut self, voice: VoiceParams) {
        self.voice = voice.clamped();
    }

    pub fn set_credential(&mut self, credential: Option<String>) {
        self.credential = credential.filter(|c| !c.trim().is_empty());
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn avatar(&self) -> &Arc<dyn Avatar> {
        &self.avatar
    }

    /// Messages the assistant has sent so far, most recent last.
    pub fn assistant_messages(&self) -> impl Iterator<Item = &Message> {
        self.chat_log.iter().filter(|m| m.role == Role::Assistant)
    }
}

impl ConversationBuilder {
    pub fn config(mut self, config: StudioConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load settings from a RON file at build time.
    pub fn config_path(mut self, path: &str) -> Self {
        self.config_path = Some(path.to_string());
        self
    }

    /// Override the credential resolved from the settings.
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn avatar(mut self, avatar: Arc<dyn Avatar>) -> Self {
        self.avatar = Some(avatar);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Start from an existing chat log (e.g. restored from a previous session).
    pub fn chat_log(mut self, log: Vec<Message>) -> Self {
        self.chat_log = log;
        self
    }

    pub fn build(self) -> Result<Conversation, TurnError> {
        let config = match (self.config, self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => StudioConfig::load_from_ron(std::path::Path::new(&path))?,
            (None, None) => StudioConfig::default(),
        };
        let synthesizer = self
            .synthesizer
            .ok_or(TurnError::MissingCollaborator("speech synthesizer"))?;
        let avatar = self.avatar.ok_or(TurnError::MissingCollaborator("avatar"))?;
        let credential = self
            .credential
            .or_else(|| config.credential())
            .filter(|c| !c.trim().is_empty());

        Ok(Conversation {
            default_system_prompt: config.system_prompt.clone(),
            system_prompt: config.system_prompt,
            voice: config.voice.clamped(),
            history_window: config.history_window,
            splitter: SentenceSplitter::new(config.split.rules())?,
            credential,
            chat_log: self.chat_log,
            dispatch: config.dispatch,
            synthesizer,
            avatar,
            presenter: self.presenter.unwrap_or_else(|| Arc::new(NullPresenter)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ports::{AudioPayload, AvatarError, ChatStream, SynthesisError};
    use crate::schema::screenplay::Talk;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    struct EchoSynth;

    #[async_trait]
    impl SpeechSynthesizer for EchoSynth {
        async fn synthesize(&self, talk: &Talk) -> Result<AudioPayload, SynthesisError> {
            Ok(AudioPayload::Raw(talk.message.clone().into_bytes()))
        }
    }

    #[derive(Default)]
    struct QuietAvatar;

    #[async_trait]
    impl Avatar for QuietAvatar {
        async fn load_model(&self, _source: &str) -> Result<(), AvatarError> {
            Ok(())
        }
        async fn apply_expression(&self, _emotion: Emotion) -> Result<(), AvatarError> {
            Ok(())
        }
        async fn play_audio_with_lip_sync(&self, _audio: &[u8]) -> Result<(), AvatarError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        shown: Mutex<Vec<String>>,
        processing: Mutex<Vec<bool>>,
    }

    impl Presenter for RecordingPresenter {
        fn show_assistant_message(&self, text: &str) {
            self.shown.lock().unwrap().push(text.to_string());
        }
        fn processing_changed(&self, processing: bool) {
            self.processing.lock().unwrap().push(processing);
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        chunks: Vec<Result<String, ChatError>>,
        open_error: Option<ChatError>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedSource {
        fn replying(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Ok(c.to_string())).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ChatStreamSource for ScriptedSource {
        async fn open(&self, messages: &[Message], _credential: &str) -> Result<ChatStream, ChatError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(e) = &self.open_error {
                return Err(e.clone());
            }
            Ok(stream::iter(self.chunks.clone()).boxed())
        }
    }

    fn quiet_config() -> StudioConfig {
        let mut config = StudioConfig::default();
        config.dispatch.min_synthesis_interval_ms = 0;
        config.api_key = Some("sk-test".to_string());
        config
    }

    fn conversation(presenter: Arc<RecordingPresenter>) -> Conversation {
        Conversation::builder()
            .config(quiet_config())
            .synthesizer(Arc::new(EchoSynth))
            .avatar(Arc::new(QuietAvatar))
            .presenter(presenter)
            .build()
            .unwrap()
    }

    #[test]
    fn assembler_tracks_emotion_across_sentences() {
        let mut reply = ReplyAssembler::new(SentenceSplitter::default(), VoiceParams::default());
        assert!(reply.push("[happy]おは").is_empty());
        assert_eq!(reply.emotion(), Emotion::Happy);
        assert_eq!(reply.pending(), "おは");

        let first = reply.push("よう。");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].unit.expression, Emotion::Happy);
        assert_eq!(first[0].unit.text(), "おはよう。");

        let second = reply.push("[sad]残念。");
        assert_eq!(second[0].unit.expression, Emotion::Sad);
        assert_eq!(second[0].caption, "おはよう。 残念。");

        let (transcript, units, tail) = reply.finish();
        assert_eq!(transcript, "[happy] おはよう。[sad] 残念。");
        assert_eq!(units.len(), 2);
        assert_eq!(tail, None);
    }

    #[test]
    fn assembler_unknown_tag_falls_back_to_neutral() {
        let mut reply = ReplyAssembler::new(SentenceSplitter::default(), VoiceParams::default());
        let first = reply.push("[happy]うれしい。");
        assert_eq!(first[0].unit.expression, Emotion::Happy);

        let second = reply.push("[bogus]なるほど。");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].unit.expression, Emotion::Neutral);
        assert_eq!(second[0].unit.text(), "なるほど。");
        assert_eq!(second[0].caption, "うれしい。 なるほど。");
        assert_eq!(reply.emotion(), Emotion::Neutral);

        let third = reply.push("[sad]でも。");
        assert_eq!(third[0].unit.expression, Emotion::Sad);

        let (transcript, _, _) = reply.finish();
        assert_eq!(
            transcript,
            "[happy] うれしい。[neutral] [bogus]なるほど。[sad] でも。"
        );
    }

    #[test]
    fn assembler_without_tags_keeps_plain_transcript() {
        let mut reply = ReplyAssembler::new(SentenceSplitter::default(), VoiceParams::default());
        let ready = reply.push("Hello world。 And then");
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].unit.expression, Emotion::Neutral);
        let (transcript, _, tail) = reply.finish();
        assert_eq!(transcript, "Hello world。");
        assert_eq!(tail.as_deref(), Some("And then"));
    }

    #[test]
    fn assembler_skips_unspeakable_but_captions_them() {
        let mut reply = ReplyAssembler::new(SentenceSplitter::default(), VoiceParams::default());
        let ready = reply.push("」\nはい。");
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].unit.text(), "はい。");
        assert_eq!(ready[0].caption, "」\n はい。");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_shows_placeholder() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut conv = conversation(Arc::clone(&presenter));
        conv.set_credential(None);
        let source = ScriptedSource::replying(&["[happy]Hi。"]);

        let err = conv.run_turn("hello", &source).await.unwrap_err();
        assert!(matches!(err, TurnError::MissingCredential));
        assert!(conv.chat_log().is_empty());
        assert!(source.requests.lock().unwrap().is_empty());
        assert_eq!(
            *presenter.shown.lock().unwrap(),
            vec![MISSING_CREDENTIAL_MESSAGE.to_string()]
        );
        assert!(presenter.processing.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_keeps_only_user_message() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut conv = conversation(Arc::clone(&presenter));
        let source = ScriptedSource {
            open_error: Some(ChatError::Status(500)),
            ..ScriptedSource::default()
        };

        let err = conv.run_turn("hello", &source).await.unwrap_err();
        assert!(matches!(err, TurnError::Stream(ChatError::Status(500))));
        assert_eq!(conv.chat_log(), &[Message::user("hello")]);
        assert_eq!(*presenter.processing.lock().unwrap(), vec![true, false]);
        assert_eq!(presenter.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_failure_saves_no_transcript() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut conv = conversation(Arc::clone(&presenter));
        let source = ScriptedSource {
            chunks: vec![
                Ok("[happy]一文目。".to_string()),
                Err(ChatError::Interrupted("reset".to_string())),
                Ok("二文目。".to_string()),
            ],
            ..ScriptedSource::default()
        };

        let err = conv.run_turn("hello", &source).await.unwrap_err();
        assert!(matches!(err, TurnError::Stream(ChatError::Interrupted(_))));
        assert_eq!(conv.chat_log(), &[Message::user("hello")]);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_records_transcript_and_plays_units() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut conv = conversation(Arc::clone(&presenter));
        let source = ScriptedSource::replying(&["[happy]Hello ", "world。", "[sad]Bye。 tail"]);

        let outcome = conv.run_turn("hi", &source).await.unwrap();
        assert_eq!(outcome.transcript, "[happy] Hello world。[sad] Bye。");
        assert_eq!(outcome.units.len(), 2);
        assert_eq!(outcome.discarded_tail.as_deref(), Some("tail"));
        assert_eq!(outcome.report.played(), 2);
        assert_eq!(
            conv.chat_log().last(),
            Some(&Message::assistant("[happy] Hello world。[sad] Bye。"))
        );
        assert_eq!(
            *presenter.shown.lock().unwrap(),
            vec!["Hello world。".to_string(), "Hello world。 Bye。".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_uses_system_prompt_and_history_window() {
        let presenter = Arc::new(RecordingPresenter::default());
        let history: Vec<Message> = (0..14).map(|i| Message::user(format!("m{i}"))).collect();
        let mut conv = Conversation::builder()
            .config(quiet_config())
            .synthesizer(Arc::new(EchoSynth))
            .avatar(Arc::new(QuietAvatar))
            .presenter(presenter)
            .chat_log(history)
            .build()
            .unwrap();
        conv.set_system_prompt("be brief");
        let source = ScriptedSource::replying(&["はい。"]);
        conv.run_turn("latest", &source).await.unwrap();

        let requests = source.requests.lock().unwrap();
        let sent = &requests[0];
        assert_eq!(sent.len(), 11);
        assert_eq!(sent[0], Message::system("be brief"));
        assert_eq!(sent[1], Message::user("m5"));
        assert_eq!(sent[10], Message::user("latest"));
    }

    #[test]
    fn chat_log_operations() {
        let mut conv = Conversation::builder()
            .config(quiet_config())
            .synthesizer(Arc::new(EchoSynth))
            .avatar(Arc::new(QuietAvatar))
            .chat_log(vec![Message::user("hi"), Message::assistant("[angry] No!")])
            .build()
            .unwrap();

        assert_eq!(conv.display_log()[1].content, " No!");
        conv.edit_message(0, "hello").unwrap();
        assert_eq!(conv.chat_log()[0].content, "hello");
        assert!(matches!(
            conv.edit_message(5, "x"),
            Err(TurnError::NoSuchMessage(5))
        ));
        assert_eq!(conv.assistant_messages().count(), 1);

        conv.set_system_prompt("custom");
        conv.reset_system_prompt();
        assert_eq!(conv.system_prompt(), quiet_config().system_prompt);

        conv.set_voice(VoiceParams::new(50.0, 0.0));
        assert_eq!(conv.voice().speaker_x, 10.0);

        conv.reset_chat_log();
        assert!(conv.chat_log().is_empty());
    }

    #[test]
    fn build_requires_collaborators() {
        let result = Conversation::builder().avatar(Arc::new(QuietAvatar)).build();
        assert!(matches!(
            result,
            Err(TurnError::MissingCollaborator("speech synthesizer"))
        ));
    }
}
