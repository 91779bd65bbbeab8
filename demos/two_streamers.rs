/// Two Streamers example: two avatars hold a conversation through a shared log.
///
/// Aoi opens with a manual line; every reply is published to the shared
/// store, where the other streamer picks it up on the next relay poll.
///
/// Run with: cargo run --example two_streamers

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use streamer_speech::core::config::{RelaySettings, StudioConfig};
use streamer_speech::core::conversation::Conversation;
use streamer_speech::core::ports::{
    AudioPayload, Avatar, AvatarError, ChatError, ChatStream, ChatStreamSource,
    ConversationStore, SpeechSynthesizer, SynthesisError,
};
use streamer_speech::core::relay::MemoryStore;
use streamer_speech::core::studio::Studio;
use streamer_speech::schema::emotion::Emotion;
use streamer_speech::schema::message::Message;
use streamer_speech::schema::screenplay::{Talk, VoiceParams};

/// Replies with the next canned line, streamed a few characters at a time.
struct CannedReplies {
    lines: Vec<&'static str>,
    next: AtomicUsize,
}

#[async_trait]
impl ChatStreamSource for CannedReplies {
    async fn open(&self, _messages: &[Message], _credential: &str) -> Result<ChatStream, ChatError> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let line = self.lines[index % self.lines.len()];
        let chars: Vec<char> = line.chars().collect();
        let chunks: Vec<Result<String, ChatError>> =
            chars.chunks(4).map(|c| Ok(c.iter().collect())).collect();
        Ok(stream::iter(chunks).boxed())
    }
}

struct Voice(&'static str);

#[async_trait]
impl SpeechSynthesizer for Voice {
    async fn synthesize(&self, talk: &Talk) -> Result<AudioPayload, SynthesisError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(AudioPayload::Raw(talk.message.clone().into_bytes()))
    }
}

struct Stage(&'static str);

#[async_trait]
impl Avatar for Stage {
    async fn load_model(&self, source: &str) -> Result<(), AvatarError> {
        println!("[{}] loaded {}", self.0, source);
        Ok(())
    }

    async fn apply_expression(&self, emotion: Emotion) -> Result<(), AvatarError> {
        println!("[{}] ({})", self.0, emotion);
        Ok(())
    }

    async fn play_audio_with_lip_sync(&self, audio: &[u8]) -> Result<(), AvatarError> {
        println!("[{}] {}", self.0, String::from_utf8_lossy(audio));
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    }
}

fn streamer(
    name: &'static str,
    partner: &'static str,
    voice: VoiceParams,
    lines: Vec<&'static str>,
    store: &MemoryStore,
) -> Studio {
    let mut config = StudioConfig::default();
    config.api_key = Some("demo".to_string());
    config.voice = voice;
    config.dispatch.min_synthesis_interval_ms = 200;
    config.relay = Some(RelaySettings {
        my_name: name.to_string(),
        other_name: partner.to_string(),
        poll_interval_secs: 1,
    });

    let conversation = Conversation::builder()
        .config(config.clone())
        .synthesizer(Arc::new(Voice(name)))
        .avatar(Arc::new(Stage(name)))
        .build()
        .expect("Failed to build conversation");
    let shared: Arc<dyn ConversationStore> = Arc::new(store.clone());
    Studio::from_config(
        conversation,
        Arc::new(CannedReplies {
            lines,
            next: AtomicUsize::new(0),
        }),
        &config,
        None,
        Some(shared),
    )
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let store = MemoryStore::new();

    let aoi = streamer(
        "aoi",
        "akane",
        VoiceParams::PRESET_A,
        vec![
            "[happy]こんにちは、アカネちゃん！今日は何して遊ぶ？",
            "[relaxed]いいね。のんびりしよう。",
            "[sad]もう時間みたい。またね。",
        ],
        &store,
    );
    let akane = streamer(
        "akane",
        "aoi",
        VoiceParams::PRESET_C,
        vec![
            "[neutral]うーん、お絵かきはどう？",
            "[happy]賛成！お茶も入れるね。",
        ],
        &store,
    );

    aoi.load_avatar("models/aoi.model3.json").await;
    akane.load_avatar("models/akane.model3.json").await;

    let (aoi_tx, aoi_rx) = mpsc::channel(1);
    let (_akane_tx, akane_rx) = mpsc::channel::<String>(1);
    aoi_tx
        .send("配信を始めよう".to_string())
        .await
        .expect("Failed to send opening line");

    let stop = || tokio::time::sleep(Duration::from_secs(12));
    let (aoi, akane) = tokio::join!(aoi.run(aoi_rx, stop()), akane.run(akane_rx, stop()));

    println!("\n--- Aoi's chat log ---");
    for message in aoi.conversation().display_log() {
        println!("{:<9} {}", message.role.as_str(), message.content);
    }
    println!("\n--- Akane's chat log ---");
    for message in akane.conversation().display_log() {
        println!("{:<9} {}", message.role.as_str(), message.content);
    }
}
