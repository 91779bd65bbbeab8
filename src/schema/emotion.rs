use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The emotional expression an avatar can take while speaking.
///
/// Replies from the model carry these as leading `[name]` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Angry,
    Sad,
    Relaxed,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Angry,
        Emotion::Sad,
        Emotion::Relaxed,
    ];

    /// Returns the tag name for this emotion (e.g., "happy").
    pub fn name(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
            Self::Relaxed => "relaxed",
        }
    }

    /// Returns the bracketed markup for this emotion (e.g., "[happy]").
    pub fn markup(&self) -> String {
        format!("[{}]", self.name())
    }

    /// The synthesis talk style used when speaking with this emotion.
    pub fn talk_style(&self) -> TalkStyle {
        match self {
            Self::Happy => TalkStyle::Happy,
            Self::Angry => TalkStyle::Angry,
            Self::Sad => TalkStyle::Sad,
            Self::Neutral | Self::Relaxed => TalkStyle::Talk,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion tag: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    /// Tag names are matched exactly; `[Happy]` is not an emotion tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .iter()
            .copied()
            .find(|e| e.name() == s)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Speaking style understood by the synthesis collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TalkStyle {
    #[default]
    Talk,
    Happy,
    Sad,
    Angry,
    Fear,
    Surprised,
}
