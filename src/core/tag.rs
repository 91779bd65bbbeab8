//! Emotion tags: leading-tag extraction for dispatch and tag stripping for display.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::emotion::Emotion;

/// `[anything]` anchored at the start, up to the first closing bracket.
static LEADING_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(.*?)\]").unwrap());

/// Any bracketed run of ASCII letters, including the empty `[]`.
static DISPLAY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[a-zA-Z]*\]").unwrap());

/// Result of looking for a tag at the start of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagMatch<'a> {
    /// The buffer does not start with a complete `[...]`.
    None,
    /// A recognised emotion tag; `rest` is the buffer after it.
    Emotion { emotion: Emotion, rest: &'a str },
    /// A complete leading bracket whose content is not an emotion.
    Unrecognized { name: &'a str },
}

/// Inspect the start of `buffer` for a bracketed tag without modifying it.
pub fn parse_leading_tag(buffer: &str) -> TagMatch<'_> {
    let Some(caps) = LEADING_TAG.captures(buffer) else {
        return TagMatch::None;
    };
    let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
        return TagMatch::None;
    };
    match name.as_str().parse::<Emotion>() {
        Ok(emotion) => TagMatch::Emotion {
            emotion,
            rest: &buffer[whole.end()..],
        },
        Err(_) => TagMatch::Unrecognized {
            name: name.as_str(),
        },
    }
}

/// Remove a leading emotion tag from `buffer` and return it.
///
/// Unrecognised bracket content stays in the buffer; [`strip_display_tags`]
/// takes care of it when the text is shown.
pub fn extract_leading_tag(buffer: &mut String) -> Option<Emotion> {
    let (emotion, consumed) = match parse_leading_tag(buffer) {
        TagMatch::Emotion { emotion, rest } => (emotion, buffer.len() - rest.len()),
        TagMatch::None | TagMatch::Unrecognized { .. } => return None,
    };
    buffer.drain(..consumed);
    Some(emotion)
}

/// Names of every `[letters]` tag in `text`, in order of appearance.
pub fn find_tags(text: &str) -> Vec<&str> {
    DISPLAY_TAG
        .find_iter(text)
        .map(|m| &text[m.start() + 1..m.end() - 1])
        .collect()
}

/// Strip every `[letters]` tag from `text`, known emotion or not.
///
/// Used for both the chat log and the spoken caption.
pub fn strip_display_tags(text: &str) -> String {
    DISPLAY_TAG.replace_all(text, "").into_owned()
}
