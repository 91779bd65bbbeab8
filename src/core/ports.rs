//! Collaborator seams: everything the speech pipeline talks to but does not own.
//!
//! The chat-completion transport, the speech synthesizer, the avatar
//! renderer, the live comment feed and the shared conversation log are all
//! reached through these traits. Implementations live with the host
//! application; tests and the `preview` tool provide in-process ones.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::schema::emotion::Emotion;
use crate::schema::live_comment::{MalformedLiveItem, RawLiveItem};
use crate::schema::message::Message;
use crate::schema::screenplay::Talk;

/// Incremental reply text, in arrival order.
pub type ChatStream = BoxStream<'static, Result<String, ChatError>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Request(String),
    #[error("chat stream interrupted: {0}")]
    Interrupted(String),
    #[error("chat stream returned status {0}")]
    Status(u16),
}

/// Opens one streamed chat completion.
#[async_trait]
pub trait ChatStreamSource: Send + Sync {
    async fn open(&self, messages: &[Message], credential: &str) -> Result<ChatStream, ChatError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("synthesis request failed: {0}")]
    Request(String),
    #[error("synthesizer rejected the request: {0}")]
    Rejected(String),
    #[error("audio payload could not be decoded: {0}")]
    Decode(String),
}

/// Audio as returned by a synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPayload {
    Raw(Vec<u8>),
    /// Base64 text, optionally as a `data:audio/...;base64,` URL.
    Base64(String),
}

impl AudioPayload {
    pub fn into_bytes(self) -> Result<Vec<u8>, SynthesisError> {
        match self {
            AudioPayload::Raw(bytes) => Ok(bytes),
            AudioPayload::Base64(text) => {
                let body = match text.split_once(";base64,") {
                    Some((prefix, body)) if prefix.starts_with("data:") => body,
                    _ => text.as_str(),
                };
                STANDARD
                    .decode(body.trim())
                    .map_err(|e| SynthesisError::Decode(e.to_string()))
            }
        }
    }
}

/// Turns a talk request into audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, talk: &Talk) -> Result<AudioPayload, SynthesisError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvatarError {
    #[error("avatar model could not be loaded from {source_ref}: {reason}")]
    Load { source_ref: String, reason: String },
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("expression could not be applied: {0}")]
    Expression(String),
}

/// The rendered character. Failures here never abort a turn.
#[async_trait]
pub trait Avatar: Send + Sync {
    async fn load_model(&self, source: &str) -> Result<(), AvatarError>;

    async fn apply_expression(&self, emotion: Emotion) -> Result<(), AvatarError>;

    /// Play `audio` and resolve when playback has finished.
    async fn play_audio_with_lip_sync(&self, audio: &[u8]) -> Result<(), AvatarError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveError {
    #[error("live comment request failed: {0}")]
    Request(String),
    #[error("malformed live item: {0}")]
    MalformedItem(#[from] MalformedLiveItem),
}

/// One page of a live chat feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveCommentPage {
    pub items: Vec<RawLiveItem>,
    /// Cursor to pass to the next fetch; `None` keeps the current one.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait LiveCommentSource: Send + Sync {
    async fn fetch(&self, cursor: Option<&str>) -> Result<LiveCommentPage, LiveError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
    #[error("conversation store rejected key {0}")]
    Rejected(String),
}

/// Key-value log shared between two streamers holding a conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn put(&self, key: &str, message: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}
