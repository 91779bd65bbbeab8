use serde::{Deserialize, Serialize};

use super::emotion::{Emotion, TalkStyle};

/// Lower and upper bound of each voice coordinate.
pub const VOICE_AXIS_RANGE: (f32, f32) = (-10.0, 10.0);

/// Position on the synthesizer's two-axis voice map.
///
/// `speaker_x` and `speaker_y` select timbre and expressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub speaker_x: f32,
    pub speaker_y: f32,
}

impl VoiceParams {
    pub const PRESET_A: VoiceParams = VoiceParams {
        speaker_x: 4.5,
        speaker_y: 10.0,
    };
    pub const PRESET_B: VoiceParams = VoiceParams {
        speaker_x: 3.0,
        speaker_y: 3.0,
    };
    pub const PRESET_C: VoiceParams = VoiceParams {
        speaker_x: -5.5,
        speaker_y: -3.0,
    };
    pub const PRESET_D: VoiceParams = VoiceParams {
        speaker_x: 3.5,
        speaker_y: -8.0,
    };

    /// Build a parameter pair, clamping both axes into range.
    pub fn new(speaker_x: f32, speaker_y: f32) -> Self {
        Self {
            speaker_x: clamp_axis(speaker_x),
            speaker_y: clamp_axis(speaker_y),
        }
    }

    pub fn clamped(self) -> Self {
        Self::new(self.speaker_x, self.speaker_y)
    }
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self::PRESET_B
    }
}

fn clamp_axis(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(VOICE_AXIS_RANGE.0, VOICE_AXIS_RANGE.1)
}

/// A sentence cut from the reply stream together with the emotion that
/// was active when it was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    pub text: String,
    pub emotion: Emotion,
}

/// What the synthesizer needs to voice one sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Talk {
    pub style: TalkStyle,
    pub speaker_x: f32,
    pub speaker_y: f32,
    /// Spoken text, with tag markup removed.
    pub message: String,
}

/// A compiled sentence: the avatar expression plus the talk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenplayUnit {
    pub expression: Emotion,
    pub talk: Talk,
}

impl ScreenplayUnit {
    pub fn text(&self) -> &str {
        &self.talk.message
    }
}
