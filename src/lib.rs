//! PCM Stream Library
//!
//! Streaming audio playback pipeline: incremental decoding feeding a
//! multi-buffered device queue, with underrun recovery and gapless looping.

pub mod audio;
pub mod decode;
pub mod engine;
