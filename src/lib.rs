//! Streamer Speech: the voice of a virtual streamer.
//!
//! Consumes a streamed chat-completion reply, picks up emotion tags, cuts
//! the text into speakable sentences, compiles each sentence into a
//! screenplay unit and plays the units in order while the next one is
//! already being synthesized. Live chat comments and a partner streamer's
//! messages can drive the conversation as well.

pub mod core;
pub mod schema;
