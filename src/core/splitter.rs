//! Sentence splitting for streamed replies.
//!
//! A growing buffer is cut into speakable units as soon as a sentence
//! terminal appears, or, for long clauses, at a comma. Matching is always
//! anchored at the start of what is left in the buffer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("split rules need at least one terminal glyph")]
    NoTerminals,
    #[error("invalid split pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Opening and closing bracket or quote glyphs. A unit made only of these
/// (plus whitespace) has nothing to say.
pub const PAIRED_GLYPHS: &[char] = &[
    '[', '(', '{', '「', '［', '（', '【', '『', '〈', '《', '〔', '｛', '«', '‹', '〘', '〚', '〛',
    '〙', '›', '»', '〕', '》', '〉', '』', '】', '）', '］', '」', '}', ')', ']',
];

/// Any character except a line break.
const LINE_CHAR: &str = r"[^\n\r\x{2028}\x{2029}]";

/// Boundary pattern for [`SplitRules::default`], compiled once.
static DEFAULT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(&pattern_for(&SplitRules::default())).unwrap());

/// Punctuation presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Locale {
    /// Full-width terminals and the ideographic comma.
    #[default]
    Japanese,
    /// Japanese glyphs plus ASCII `.`, `!` and `?`.
    Latin,
}

/// Which glyphs end a sentence or a long clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRules {
    pub terminals: Vec<char>,
    pub commas: Vec<char>,
    /// Characters required before a comma may end a unit.
    pub min_clause_chars: usize,
}

impl SplitRules {
    pub fn for_locale(locale: Locale) -> Self {
        let mut terminals = vec!['。', '．', '！', '？', '\n'];
        if locale == Locale::Latin {
            terminals.extend(['.', '!', '?']);
        }
        Self {
            terminals,
            commas: vec!['、', ','],
            min_clause_chars: 10,
        }
    }
}

impl Default for SplitRules {
    fn default() -> Self {
        Self::for_locale(Locale::default())
    }
}

/// Outcome of one attempt to cut a sentence from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split<'a> {
    /// No complete unit yet; wait for more text.
    NoMatch,
    Match {
        text: &'a str,
        /// Remainder with leading whitespace trimmed.
        rest: &'a str,
        speakable: bool,
    },
}

/// An owned unit cut from a buffer by [`SentenceSplitter::take_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub speakable: bool,
}

#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    rules: SplitRules,
    pattern: Regex,
}

impl SentenceSplitter {
    pub fn new(rules: SplitRules) -> Result<Self, SplitError> {
        if rules.terminals.is_empty() {
            return Err(SplitError::NoTerminals);
        }
        Ok(Self {
            pattern: Regex::new(&pattern_for(&rules))?,
            rules,
        })
    }

    pub fn rules(&self) -> &SplitRules {
        &self.rules
    }

    /// Try to cut the next unit off the front of `buffer`.
    ///
    /// The terminal rule takes priority over the clause rule, and both are
    /// greedy within the first line.
    pub fn split_next<'a>(&self, buffer: &'a str) -> Split<'a> {
        match self.pattern.find(buffer) {
            Some(m) => {
                let text = m.as_str();
                Split::Match {
                    text,
                    rest: buffer[m.end()..].trim_start(),
                    speakable: is_speakable(text),
                }
            }
            None => Split::NoMatch,
        }
    }

    /// Cut the next unit off `buffer` in place.
    pub fn take_next(&self, buffer: &mut String) -> Option<Segment> {
        let (segment, rest) = match self.split_next(buffer) {
            Split::NoMatch => return None,
            Split::Match {
                text,
                rest,
                speakable,
            } => (
                Segment {
                    text: text.to_string(),
                    speakable,
                },
                rest.to_string(),
            ),
        };
        *buffer = rest;
        Some(segment)
    }

    /// Cut every complete unit currently in `buffer`, leaving the tail.
    pub fn drain(&self, buffer: &mut String) -> Vec<Segment> {
        let mut segments = Vec::new();
        while let Some(segment) = self.take_next(buffer) {
            segments.push(segment);
        }
        segments
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self {
            rules: SplitRules::default(),
            pattern: DEFAULT_PATTERN.clone(),
        }
    }
}

/// Whether `text` contains anything other than whitespace and bracket glyphs.
pub fn is_speakable(text: &str) -> bool {
    !text
        .chars()
        .all(|c| c.is_whitespace() || PAIRED_GLYPHS.contains(&c))
}

fn pattern_for(rules: &SplitRules) -> String {
    let terminals = char_class(&rules.terminals);
    // With no commas the clause rule can never fire.
    if rules.commas.is_empty() {
        format!("^(?:{line}+{terminals})", line = LINE_CHAR)
    } else {
        format!(
            "^(?:{line}+{terminals}|{line}{{{min},}}{commas})",
            line = LINE_CHAR,
            min = rules.min_clause_chars,
            commas = char_class(&rules.commas),
        )
    }
}

fn char_class(glyphs: &[char]) -> String {
    let mut class = String::from("[");
    for c in glyphs {
        class.push_str(&regex::escape(&c.to_string()));
    }
    class.push(']');
    class
}
