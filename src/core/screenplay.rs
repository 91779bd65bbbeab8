//! Screenplay compilation: tagged sentences to synthesis-ready units.

use crate::core::tag::{parse_leading_tag, strip_display_tags, TagMatch};
use crate::schema::emotion::Emotion;
use crate::schema::screenplay::{ScreenplayUnit, SentenceUnit, Talk, VoiceParams};

/// Compile one sentence with the voice it should be spoken in.
pub fn compile(unit: &SentenceUnit, voice: VoiceParams) -> ScreenplayUnit {
    build(unit.emotion, &unit.text, voice)
}

/// Compile a batch of texts that may carry `[tag]` markup.
///
/// Each text is compiled on its own: a text without a recognised tag is
/// neutral no matter what came before it.
pub fn compile_texts<S: AsRef<str>>(texts: &[S], voice: VoiceParams) -> Vec<ScreenplayUnit> {
    texts
        .iter()
        .map(|text| {
            let text = text.as_ref();
            build(leading_emotion(text), text, voice)
        })
        .collect()
}

fn leading_emotion(text: &str) -> Emotion {
    match parse_leading_tag(text.trim_start()) {
        TagMatch::Emotion { emotion, .. } => emotion,
        TagMatch::None | TagMatch::Unrecognized { .. } => Emotion::Neutral,
    }
}

fn build(expression: Emotion, text: &str, voice: VoiceParams) -> ScreenplayUnit {
    let voice = voice.clamped();
    ScreenplayUnit {
        expression,
        talk: Talk {
            style: expression.talk_style(),
            speaker_x: voice.speaker_x,
            speaker_y: voice.speaker_y,
            message: strip_display_tags(text),
        },
    }
}
