//! The long-running host loop.
//!
//! Manual input, live comments and the dialogue partner all feed the same
//! conversation. Each becomes one turn, and a turn is awaited to the end
//! of its playback before the next input is taken.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::core::config::StudioConfig;
use crate::core::conversation::{Conversation, TurnError, TurnOutcome};
use crate::core::live::LiveCommentPoller;
use crate::core::ports::{ChatStreamSource, ConversationStore, LiveCommentSource};
use crate::core::relay::DialogueRelay;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where a turn's input came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Manual(String),
    LiveComment { author: String, text: String },
    Partner(String),
}

impl TurnInput {
    pub fn text(&self) -> &str {
        match self {
            TurnInput::Manual(text) | TurnInput::Partner(text) => text,
            TurnInput::LiveComment { text, .. } => text,
        }
    }
}

pub struct Studio {
    conversation: Conversation,
    chat_source: Arc<dyn ChatStreamSource>,
    live: Option<(LiveCommentPoller, Duration)>,
    relay: Option<(DialogueRelay, Duration)>,
}

impl Studio {
    pub fn new(conversation: Conversation, chat_source: Arc<dyn ChatStreamSource>) -> Self {
        Self {
            conversation,
            chat_source,
            live: None,
            relay: None,
        }
    }

    /// Wire up the optional live feed and relay according to `config`.
    pub fn from_config(
        conversation: Conversation,
        chat_source: Arc<dyn ChatStreamSource>,
        config: &StudioConfig,
        live_source: Option<Arc<dyn LiveCommentSource>>,
        store: Option<Arc<dyn ConversationStore>>,
    ) -> Self {
        let mut studio = Self::new(conversation, chat_source);
        if let Some(source) = live_source {
            studio = studio.with_live_comments(
                LiveCommentPoller::new(source, &config.live),
                Duration::from_secs(config.live.poll_interval_secs),
            );
        }
        match (store, &config.relay) {
            (Some(store), Some(settings)) => {
                studio = studio.with_relay(
                    DialogueRelay::new(store, settings),
                    Duration::from_secs(settings.poll_interval_secs),
                );
            }
            (Some(_), None) => warn!("conversation store given but no relay names configured"),
            _ => {}
        }
        studio
    }

    pub fn with_live_comments(mut self, poller: LiveCommentPoller, every: Duration) -> Self {
        self.live = Some((poller, every));
        self
    }

    pub fn with_relay(mut self, relay: DialogueRelay, every: Duration) -> Self {
        self.relay = Some((relay, every));
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// Load the avatar model. Failure is logged and the studio keeps running.
    pub async fn load_avatar(&self, source: &str) -> bool {
        match self.conversation.avatar().load_model(source).await {
            Ok(()) => {
                info!("avatar loaded from {source}");
                true
            }
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    /// Run one turn and share the reply with the dialogue partner.
    pub async fn handle(&mut self, input: TurnInput) -> Result<TurnOutcome, TurnError> {
        match &input {
            TurnInput::Manual(_) => info!("turn from manual input"),
            TurnInput::LiveComment { author, .. } => info!("turn from live comment by {author}"),
            TurnInput::Partner(_) => info!("turn from dialogue partner"),
        }
        let outcome = self
            .conversation
            .run_turn(input.text(), self.chat_source.as_ref())
            .await?;
        if let Some((relay, _)) = &self.relay {
            if let Err(e) = relay.publish(&outcome.transcript).await {
                warn!("could not publish reply: {e}");
            }
        }
        Ok(outcome)
    }

    /// Serve turns until `inbox` closes or `shutdown` resolves.
    ///
    /// Shutdown also interrupts a turn that is still playing.
    pub async fn run<F>(mut self, mut inbox: mpsc::Receiver<String>, shutdown: F) -> Self
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut live_tick = self.live.as_ref().map(|(_, every)| ticker(*every));
        let mut relay_tick = self.relay.as_ref().map(|(_, every)| ticker(*every));

        loop {
            let input = tokio::select! {
                _ = &mut shutdown => break,
                received = inbox.recv() => match received {
                    Some(text) if text.trim().is_empty() => continue,
                    Some(text) => TurnInput::Manual(text),
                    None => break,
                },
                _ = next_tick(&mut live_tick) => match self.poll_live().await {
                    Some(input) => input,
                    None => continue,
                },
                _ = next_tick(&mut relay_tick) => match self.poll_relay().await {
                    Some(input) => input,
                    None => continue,
                },
            };
            let turn = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown during a turn, dropping queued speech");
                    break;
                }
                turn = self.handle(input) => turn,
            };
            if let Err(e) = turn {
                error!("turn failed: {e}");
            }
        }
        info!("studio stopped");
        self
    }

    async fn poll_live(&mut self) -> Option<TurnInput> {
        let (poller, _) = self.live.as_mut()?;
        match poller.poll_once().await {
            Ok(comment) => comment.map(|c| TurnInput::LiveComment {
                author: c.author,
                text: c.text,
            }),
            Err(e) => {
                warn!("live comment poll failed: {e}");
                None
            }
        }
    }

    async fn poll_relay(&mut self) -> Option<TurnInput> {
        let (relay, _) = self.relay.as_mut()?;
        match relay.poll_partner().await {
            Ok(message) => message.map(TurnInput::Partner),
            Err(e) => {
                warn!("relay poll failed: {e}");
                None
            }
        }
    }
}

fn ticker(every: Duration) -> Interval {
    let every = every.max(MIN_POLL_INTERVAL);
    let mut interval = interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ports::{
        AudioPayload, Avatar, AvatarError, ChatError, ChatStream, LiveCommentPage, LiveError,
        SpeechSynthesizer, SynthesisError,
    };
    use crate::core::relay::MemoryStore;
    use crate::schema::emotion::Emotion;
    use crate::schema::live_comment::RawLiveItem;
    use crate::schema::message::Message;
    use crate::schema::screenplay::Talk;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct EchoSynth;

    #[async_trait]
    impl SpeechSynthesizer for EchoSynth {
        async fn synthesize(&self, talk: &Talk) -> Result<AudioPayload, SynthesisError> {
            Ok(AudioPayload::Raw(talk.message.clone().into_bytes()))
        }
    }

    #[derive(Default)]
    struct StubAvatar {
        fail_load: bool,
    }

    #[async_trait]
    impl Avatar for StubAvatar {
        async fn load_model(&self, source: &str) -> Result<(), AvatarError> {
            if self.fail_load {
                return Err(AvatarError::Load {
                    source_ref: source.to_string(),
                    reason: "missing file".to_string(),
                });
            }
            Ok(())
        }
        async fn apply_expression(&self, _emotion: Emotion) -> Result<(), AvatarError> {
            Ok(())
        }
        async fn play_audio_with_lip_sync(&self, _audio: &[u8]) -> Result<(), AvatarError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    /// Replies "[happy] You said: <input>。" to whatever the user said last.
    struct ParrotSource;

    #[async_trait]
    impl ChatStreamSource for ParrotSource {
        async fn open(&self, messages: &[Message], _credential: &str) -> Result<ChatStream, ChatError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let chunks = vec![Ok("[happy]You said: ".to_string()), Ok(format!("{last}。"))];
            Ok(stream::iter(chunks).boxed())
        }
    }

    struct OneComment(Mutex<bool>);

    #[async_trait]
    impl LiveCommentSource for OneComment {
        async fn fetch(&self, _cursor: Option<&str>) -> Result<LiveCommentPage, LiveError> {
            let mut served = self.0.lock().unwrap();
            let items = if *served {
                Vec::new()
            } else {
                *served = true;
                vec![RawLiveItem {
                    author: Some("viewer".to_string()),
                    message: Some("what game is this".to_string()),
                    ..RawLiveItem::default()
                }]
            };
            Ok(LiveCommentPage {
                items,
                next_cursor: Some("next".to_string()),
            })
        }
    }

    fn config() -> StudioConfig {
        let mut config = StudioConfig::default();
        config.api_key = Some("sk-test".to_string());
        config.dispatch.min_synthesis_interval_ms = 0;
        config.live.seed = Some(3);
        config
    }

    fn conversation(avatar: StubAvatar) -> Conversation {
        Conversation::builder()
            .config(config())
            .synthesizer(Arc::new(EchoSynth))
            .avatar(Arc::new(avatar))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn manual_inputs_run_in_order_until_inbox_closes() {
        let studio = Studio::new(conversation(StubAvatar::default()), Arc::new(ParrotSource));
        let (tx, rx) = mpsc::channel(4);
        tx.send("one".to_string()).await.unwrap();
        tx.send("   ".to_string()).await.unwrap();
        tx.send("two".to_string()).await.unwrap();
        drop(tx);

        let studio = studio.run(rx, std::future::pending()).await;
        let log = studio.conversation().chat_log();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], Message::user("one"));
        assert_eq!(log[1], Message::assistant("[happy] You said: one。"));
        assert_eq!(log[2], Message::user("two"));
    }

    #[tokio::test(start_paused = true)]
    async fn live_comment_becomes_a_turn() {
        let conv = conversation(StubAvatar::default());
        let source: Arc<dyn LiveCommentSource> = Arc::new(OneComment(Mutex::new(false)));
        let studio = Studio::from_config(conv, Arc::new(ParrotSource), &config(), Some(source), None);
        let (_tx, rx) = mpsc::channel::<String>(1);

        let studio = studio
            .run(rx, tokio::time::sleep(Duration::from_secs(50)))
            .await;
        let log = studio.conversation().chat_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], Message::user("what game is this"));
    }

    #[tokio::test(start_paused = true)]
    async fn partner_messages_are_answered_and_replies_published() {
        let store = MemoryStore::new();
        store.put("akane", "[relaxed] いい天気だね。").await.unwrap();
        let mut config = config();
        config.relay = Some(crate::core::config::RelaySettings {
            my_name: "aoi".to_string(),
            other_name: "akane".to_string(),
            poll_interval_secs: 5,
        });
        let shared: Arc<dyn ConversationStore> = Arc::new(store.clone());
        let studio = Studio::from_config(
            conversation(StubAvatar::default()),
            Arc::new(ParrotSource),
            &config,
            None,
            Some(shared),
        );
        let (_tx, rx) = mpsc::channel::<String>(1);

        let studio = studio
            .run(rx, tokio::time::sleep(Duration::from_secs(12)))
            .await;
        // The unchanged partner message is answered only once.
        assert_eq!(studio.conversation().chat_log().len(), 2);
        assert_eq!(
            store.get("aoi").await.unwrap().as_deref(),
            Some("[happy] You said: [relaxed] いい天気だね。。")
        );
    }

    /// Counts finished playbacks; each one takes ten minutes.
    struct SlowAvatar(Arc<AtomicUsize>);

    #[async_trait]
    impl Avatar for SlowAvatar {
        async fn load_model(&self, _source: &str) -> Result<(), AvatarError> {
            Ok(())
        }
        async fn apply_expression(&self, _emotion: Emotion) -> Result<(), AvatarError> {
            Ok(())
        }
        async fn play_audio_with_lip_sync(&self, _audio: &[u8]) -> Result<(), AvatarError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_playing_turn() {
        let played = Arc::new(AtomicUsize::new(0));
        let conv = Conversation::builder()
            .config(config())
            .synthesizer(Arc::new(EchoSynth))
            .avatar(Arc::new(SlowAvatar(Arc::clone(&played))))
            .build()
            .unwrap();
        let studio = Studio::new(conv, Arc::new(ParrotSource));
        let (tx, rx) = mpsc::channel(1);
        tx.send("hello".to_string()).await.unwrap();

        let started = Instant::now();
        let studio = studio
            .run(rx, tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(played.load(Ordering::SeqCst), 0);
        // The reply was recorded before playback began.
        assert_eq!(studio.conversation().chat_log().len(), 2);

        // Abandoned playback tasks never finish later either.
        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(played.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_turns_do_not_stop_the_loop() {
        let mut conv = conversation(StubAvatar::default());
        conv.set_credential(None);
        let studio = Studio::new(conv, Arc::new(ParrotSource));
        let (tx, rx) = mpsc::channel(2);
        tx.send("hello".to_string()).await.unwrap();
        tx.send("again".to_string()).await.unwrap();
        drop(tx);

        let studio = studio.run(rx, std::future::pending()).await;
        assert!(studio.conversation().chat_log().is_empty());
    }

    #[tokio::test]
    async fn avatar_load_failure_is_not_fatal() {
        let studio = Studio::new(
            conversation(StubAvatar { fail_load: true }),
            Arc::new(ParrotSource),
        );
        assert!(!studio.load_avatar("models/missing.model3.json").await);

        let studio = Studio::new(conversation(StubAvatar::default()), Arc::new(ParrotSource));
        assert!(studio.load_avatar("models/ok.model3.json").await);
    }
}
