use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A live chat comment as delivered by a comment source, before validation.
///
/// Fields are optional because upstream feeds routinely omit them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLiveItem {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Plain text message body.
    #[serde(default)]
    pub message: Option<String>,
    /// Comment attached to a paid highlight; replaces `message` when present.
    #[serde(default)]
    pub super_chat: Option<String>,
}

/// A validated live chat comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiveComment {
    pub author: String,
    pub icon_url: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedLiveItem {
    #[error("live item has no author")]
    MissingAuthor,
}

impl TryFrom<RawLiveItem> for LiveComment {
    type Error = MalformedLiveItem;

    /// An item with neither message nor super chat text converts to a
    /// comment with empty text; callers drop those.
    fn try_from(raw: RawLiveItem) -> Result<Self, Self::Error> {
        let author = raw.author.ok_or(MalformedLiveItem::MissingAuthor)?;
        let text = raw.super_chat.or(raw.message).unwrap_or_default();
        Ok(LiveComment {
            author,
            icon_url: raw.icon_url,
            text,
        })
    }
}
