//! WASM bindings for streamer-speech: lets a browser overlay run the same
//! tagging and sentence splitting as the studio.

use wasm_bindgen::prelude::*;

use streamer_speech::core::conversation::ReplyAssembler;
use streamer_speech::core::screenplay;
use streamer_speech::core::splitter::{Locale, SentenceSplitter, SplitRules};
use streamer_speech::core::tag::strip_display_tags;
use streamer_speech::schema::emotion::Emotion;
use streamer_speech::schema::screenplay::{ScreenplayUnit, VoiceParams};

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct UnitInfo {
    emotion: String,
    style: String,
    speaker_x: f32,
    speaker_y: f32,
    text: String,
    caption: Option<String>,
}

impl UnitInfo {
    fn from_unit(unit: &ScreenplayUnit, caption: Option<String>) -> Self {
        UnitInfo {
            emotion: unit.expression.name().to_string(),
            style: format!("{:?}", unit.talk.style).to_lowercase(),
            speaker_x: unit.talk.speaker_x,
            speaker_y: unit.talk.speaker_y,
            text: unit.talk.message.clone(),
            caption,
        }
    }
}

#[derive(serde::Serialize)]
struct SegmentInfo {
    text: String,
    speakable: bool,
}

#[derive(serde::Serialize)]
struct SplitInfo {
    segments: Vec<SegmentInfo>,
    tail: String,
}

#[derive(serde::Serialize)]
struct ReplySummary {
    transcript: String,
    units: Vec<UnitInfo>,
    discarded_tail: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------
fn parse_locale(s: &str) -> Locale {
    match s.to_lowercase().as_str() {
        "latin" | "en" | "english" => Locale::Latin,
        _ => Locale::Japanese,
    }
}

fn splitter_for(locale: &str) -> Result<SentenceSplitter, JsError> {
    SentenceSplitter::new(SplitRules::for_locale(parse_locale(locale)))
        .map_err(|e| JsError::new(&e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| JsError::new(&e.to_string()))
}

// ---------------------------------------------------------------------------
// Streaming reply
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct ReplyStream {
    assembler: ReplyAssembler,
}

#[wasm_bindgen]
impl ReplyStream {
    #[wasm_bindgen(constructor)]
    pub fn new(locale: &str, speaker_x: f32, speaker_y: f32) -> Result<ReplyStream, JsError> {
        Ok(ReplyStream {
            assembler: ReplyAssembler::new(
                splitter_for(locale)?,
                VoiceParams::new(speaker_x, speaker_y),
            ),
        })
    }

    /// Append a chunk; returns a JSON array of the units it completed.
    pub fn push(&mut self, chunk: &str) -> Result<String, JsError> {
        let units: Vec<UnitInfo> = self
            .assembler
            .push(chunk)
            .into_iter()
            .map(|u| UnitInfo::from_unit(&u.unit, Some(u.caption)))
            .collect();
        to_json(&units)
    }

    /// Text received but not yet part of a sentence.
    pub fn pending(&self) -> String {
        self.assembler.pending().to_string()
    }

    pub fn emotion(&self) -> String {
        self.assembler.emotion().name().to_string()
    }

    /// End the reply; returns the transcript, all units and the discarded tail as JSON.
    pub fn finish(self) -> Result<String, JsError> {
        let (transcript, units, discarded_tail) = self.assembler.finish();
        to_json(&ReplySummary {
            transcript,
            units: units.iter().map(|u| UnitInfo::from_unit(u, None)).collect(),
            discarded_tail,
        })
    }
}

// ---------------------------------------------------------------------------
// Stateless helpers
// ---------------------------------------------------------------------------

/// Split `text` into sentences; returns `{ segments, tail }` as JSON.
#[wasm_bindgen]
pub fn split_sentences(text: &str, locale: &str) -> Result<String, JsError> {
    let splitter = splitter_for(locale)?;
    let mut buffer = text.to_string();
    let segments = splitter
        .drain(&mut buffer)
        .into_iter()
        .map(|s| SegmentInfo {
            text: s.text,
            speakable: s.speakable,
        })
        .collect();
    to_json(&SplitInfo {
        segments,
        tail: buffer,
    })
}

/// Remove `[tag]` markup for display.
#[wasm_bindgen]
pub fn strip_tags(text: &str) -> String {
    strip_display_tags(text)
}

/// Compile a JSON array of tagged texts into screenplay units (JSON).
#[wasm_bindgen]
pub fn compile_texts(texts_json: &str, speaker_x: f32, speaker_y: f32) -> Result<String, JsError> {
    let texts: Vec<String> = serde_json::from_str(texts_json)
        .map_err(|e| JsError::new(&format!("Invalid texts JSON: {}", e)))?;
    let units = screenplay::compile_texts(&texts, VoiceParams::new(speaker_x, speaker_y));
    to_json(
        &units
            .iter()
            .map(|u| UnitInfo::from_unit(u, None))
            .collect::<Vec<_>>(),
    )
}

#[wasm_bindgen]
pub fn emotions() -> String {
    let names: Vec<&str> = Emotion::ALL.iter().map(|e| e.name()).collect();
    serde_json::to_string(&names).unwrap_or_default()
}

#[wasm_bindgen]
pub fn voice_presets() -> String {
    let presets = [
        ("A", VoiceParams::PRESET_A),
        ("B", VoiceParams::PRESET_B),
        ("C", VoiceParams::PRESET_C),
        ("D", VoiceParams::PRESET_D),
    ];
    let presets: Vec<(&str, f32, f32)> = presets
        .iter()
        .map(|(name, v)| (*name, v.speaker_x, v.speaker_y))
        .collect();
    serde_json::to_string(&presets).unwrap_or_default()
}
