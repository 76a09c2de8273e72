//! Movement recordings
//!
//! A recording is the joint axis bytes of successive controller frames,
//! stamped relative to the start of capture. Playback interpolates linearly
//! between neighbouring frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FluxError;
use crate::types::{ControllerFrame, CHANNEL_COUNT};

/// Recording format version
pub const RECORDING_VERSION: u32 = 1;

/// Playback keeps running this long after the last frame
pub const PLAYBACK_TAIL_MS: u64 = 500;

/// Joint axes of one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFrame {
    /// Milliseconds since the start of the recording
    pub timestamp: u64,
    pub joints: [u8; CHANNEL_COUNT],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub version: u32,
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub movement: Vec<MovementFrame>,
}

impl Recording {
    /// Load and validate a recording from JSON
    pub fn from_json(json: &str) -> Result<Self, FluxError> {
        let recording: Recording = serde_json::from_str(json)?;
        recording.validate()?;
        Ok(recording)
    }

    pub fn to_json(&self) -> Result<String, FluxError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), FluxError> {
        if self.version != RECORDING_VERSION {
            return Err(FluxError::Validation(format!(
                "unsupported recording version {}",
                self.version
            )));
        }
        for pair in self.movement.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(FluxError::Validation(format!(
                    "frame at {} ms precedes frame at {} ms",
                    pair[1].timestamp, pair[0].timestamp
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.movement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movement.is_empty()
    }

    /// Playback length, including the tail after the last frame
    pub fn duration_ms(&self) -> u64 {
        self.movement
            .last()
            .map(|f| f.timestamp + PLAYBACK_TAIL_MS)
            .unwrap_or(0)
    }

    pub fn is_finished(&self, elapsed_ms: u64) -> bool {
        elapsed_ms >= self.duration_ms()
    }

    /// Joint values at `elapsed_ms` into playback.
    ///
    /// Before the first frame the first frame is held; after the last one the
    /// last frame is held.
    pub fn sample_at(&self, elapsed_ms: u64) -> Option<[u8; CHANNEL_COUNT]> {
        let first = self.movement.first()?;
        if elapsed_ms <= first.timestamp {
            return Some(first.joints);
        }

        // First frame strictly after `elapsed_ms`
        let next = self
            .movement
            .partition_point(|f| f.timestamp <= elapsed_ms);
        if next >= self.movement.len() {
            return self.movement.last().map(|f| f.joints);
        }

        let a = &self.movement[next - 1];
        let b = &self.movement[next];
        let span = (b.timestamp - a.timestamp) as f64;
        let progress = (elapsed_ms - a.timestamp) as f64 / span;

        let mut joints = [0u8; CHANNEL_COUNT];
        for (i, slot) in joints.iter_mut().enumerate() {
            let from = a.joints[i] as f64;
            let to = b.joints[i] as f64;
            *slot = (from + (to - from) * progress).round().clamp(0.0, 255.0) as u8;
        }
        Some(joints)
    }
}

/// Captures controller frames into a [`Recording`]
#[derive(Debug)]
pub struct Recorder {
    start_ms: u64,
    recorded_at: DateTime<Utc>,
    movement: Vec<MovementFrame>,
}

impl Recorder {
    pub fn start(now_ms: u64) -> Self {
        Self::start_at(now_ms, Utc::now())
    }

    pub fn start_at(now_ms: u64, recorded_at: DateTime<Utc>) -> Self {
        debug!(now_ms, "recording started");
        Self {
            start_ms: now_ms,
            recorded_at,
            movement: Vec::new(),
        }
    }

    /// Append the joint axes of `frame`.
    ///
    /// A `now_ms` earlier than the last captured frame is stamped with that
    /// frame's time, so a finished recording always loads back.
    pub fn capture(&mut self, frame: &ControllerFrame, now_ms: u64) {
        let mut joints = [0u8; CHANNEL_COUNT];
        joints.copy_from_slice(&frame.axes[..CHANNEL_COUNT]);
        let last = self.movement.last().map_or(0, |f| f.timestamp);
        let timestamp = now_ms.saturating_sub(self.start_ms);
        if timestamp < last {
            debug!(timestamp, last, "capture time went backwards, clamping");
        }
        self.movement.push(MovementFrame {
            timestamp: timestamp.max(last),
            joints,
        });
    }

    pub fn len(&self) -> usize {
        self.movement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movement.is_empty()
    }

    pub fn finish(self) -> Recording {
        debug!(frames = self.movement.len(), "recording stopped");
        Recording {
            version: RECORDING_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            recorded_at: self.recorded_at,
            movement: self.movement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame_with(value: u8) -> ControllerFrame {
        let mut frame = ControllerFrame::neutral();
        frame.axes[..CHANNEL_COUNT].fill(value);
        frame
    }

    fn two_frame_recording() -> Recording {
        let mut recorder = Recorder::start(1_000);
        recorder.capture(&frame_with(0), 1_000);
        recorder.capture(&frame_with(100), 1_100);
        recorder.finish()
    }

    #[test]
    fn test_recorder_relative_timestamps() {
        let recording = two_frame_recording();
        assert_eq!(recording.version, RECORDING_VERSION);
        assert_eq!(recording.len(), 2);
        assert_eq!(recording.movement[0].timestamp, 0);
        assert_eq!(recording.movement[1].timestamp, 100);
        assert!(uuid::Uuid::parse_str(&recording.id).is_ok());
    }

    #[test]
    fn test_capture_clamps_backwards_time() {
        let mut recorder = Recorder::start(0);
        for (t, value) in [(0, 0), (300, 30), (100, 10), (50, 5)] {
            recorder.capture(&frame_with(value), t);
        }
        let recording = recorder.finish();
        let stamps: Vec<u64> = recording.movement.iter().map(|f| f.timestamp).collect();
        assert_eq!(stamps, vec![0, 300, 300, 300]);

        let loaded = Recording::from_json(&recording.to_json().unwrap()).unwrap();
        assert_eq!(loaded, recording);
    }

    #[test]
    fn test_sample_at_interpolates() {
        let recording = two_frame_recording();
        assert_eq!(recording.sample_at(0), Some([0; CHANNEL_COUNT]));
        assert_eq!(recording.sample_at(25), Some([25; CHANNEL_COUNT]));
        assert_eq!(recording.sample_at(67), Some([67; CHANNEL_COUNT]));
        assert_eq!(recording.sample_at(100), Some([100; CHANNEL_COUNT]));
    }

    #[test]
    fn test_sample_at_holds_last_frame() {
        let recording = two_frame_recording();
        assert_eq!(recording.sample_at(450), Some([100; CHANNEL_COUNT]));
        assert_eq!(recording.duration_ms(), 600);
        assert!(!recording.is_finished(599));
        assert!(recording.is_finished(600));
    }

    #[test]
    fn test_empty_recording() {
        let recording = Recorder::start(0).finish();
        assert!(recording.is_empty());
        assert_eq!(recording.sample_at(10), None);
        assert_eq!(recording.duration_ms(), 0);
    }

    #[test]
    fn test_json_layout() {
        let recording = two_frame_recording();
        let json = recording.to_json().unwrap();
        assert!(json.contains("\"version\": 1"));
        assert!(json.contains("\"movement\""));

        let loaded = Recording::from_json(&json).unwrap();
        assert_eq!(loaded, recording);
    }

    #[test]
    fn test_rejects_other_versions() {
        let mut recording = two_frame_recording();
        recording.version = 2;
        let json = serde_json::to_string(&recording).unwrap();
        assert!(matches!(
            Recording::from_json(&json),
            Err(FluxError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_unordered_frames() {
        let mut recording = two_frame_recording();
        recording.movement.swap(0, 1);
        assert!(recording.validate().is_err());
    }
}
