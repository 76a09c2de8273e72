//! Stored data formats
//!
//! `glove.sample.v1` captures the per-cycle inputs of the pipeline so streams
//! can be replayed off-device. Movement recordings hold the joint axes of
//! produced frames for playback.

mod recording;
mod sample;

pub use recording::*;
pub use sample::*;
