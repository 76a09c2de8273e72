//! Device configuration
//!
//! The glove's calibration bounds, sensor inversion flags, gesture thresholds
//! and timing constants. `DeviceConfig::default()` is the fixed table the
//! firmware boots with; a JSON copy can be loaded for replay and host tooling.

use serde::{Deserialize, Serialize};

use crate::error::FluxError;
use crate::report::OutputMode;
use crate::types::CHANNEL_COUNT;

/// Most gesture channels a glove can map to buttons
pub const MAX_GESTURE_CHANNELS: usize = 5;

/// Calibration bounds and polarity of one positional channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub min: i32,
    pub max: i32,
    #[serde(default)]
    pub inverted: bool,
}

/// Hysteresis thresholds for one gesture (button) channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureConfig {
    /// Joint channel this gesture watches
    pub joint: usize,
    pub press_threshold: i32,
    pub release_threshold: i32,
    pub debounce_ms: u64,
}

/// Complete device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub channels: Vec<ChannelConfig>,
    pub gestures: Vec<GestureConfig>,
    /// Deadzone width around the stick center, in output units
    pub deadzone: u8,
    pub initial_mode: OutputMode,
    /// Pause at the end of every connected cycle
    pub cycle_delay_ms: u64,
    /// Wait before the gesture baseline samples are taken
    pub settle_delay_ms: u64,
    pub calibration_samples: u32,
    pub calibration_sample_delay_ms: u64,
}

const fn channel(min: i32, max: i32, inverted: bool) -> ChannelConfig {
    ChannelConfig { min, max, inverted }
}

const fn gesture(joint: usize, press_threshold: i32, release_threshold: i32) -> GestureConfig {
    GestureConfig {
        joint,
        press_threshold,
        release_threshold,
        debounce_ms: 50,
    }
}

/// Boot-time channel table.
///
/// The min/max ranges are placeholders for a per-glove calibration and should
/// be replaced by measured extrema. The inversion flags are fixed by sensor
/// mounting.
const DEFAULT_CHANNELS: [ChannelConfig; CHANNEL_COUNT] = [
    // thumb
    channel(1480, 2620, false),
    channel(1710, 2390, false),
    channel(1530, 2570, false),
    channel(0, 4095, false),
    // index
    channel(1820, 2280, false),
    channel(1450, 2650, true),
    channel(1500, 2600, false),
    // middle
    channel(1800, 2300, false),
    channel(1450, 2650, true),
    channel(1500, 2600, false),
    // ring
    channel(1810, 2290, false),
    channel(1460, 2640, true),
    channel(1500, 2600, false),
    // pinky
    channel(1830, 2270, false),
    channel(1470, 2630, true),
    channel(1510, 2590, false),
];

/// Index, middle, ring and pinky MCP flexion
const DEFAULT_GESTURES: [GestureConfig; 4] = [
    gesture(5, 200, 192),
    gesture(8, 200, 192),
    gesture(11, 180, 172),
    gesture(14, 230, 222),
];

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS.to_vec(),
            gestures: DEFAULT_GESTURES.to_vec(),
            deadzone: 32,
            initial_mode: OutputMode::Debug,
            cycle_delay_ms: 1,
            settle_delay_ms: 500,
            calibration_samples: 10,
            calibration_sample_delay_ms: 20,
        }
    }
}

impl DeviceConfig {
    /// Load and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, FluxError> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, FluxError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the structural invariants of the table.
    ///
    /// An empty calibration range (`max == min`) is accepted; the mapper
    /// clamps it at compute time.
    pub fn validate(&self) -> Result<(), FluxError> {
        if self.channels.len() != CHANNEL_COUNT {
            return Err(FluxError::InvalidConfig(format!(
                "expected {} channels, found {}",
                CHANNEL_COUNT,
                self.channels.len()
            )));
        }

        for (idx, ch) in self.channels.iter().enumerate() {
            if ch.max < ch.min {
                return Err(FluxError::InvalidConfig(format!(
                    "channel {}: max ({}) is below min ({})",
                    idx, ch.max, ch.min
                )));
            }
        }

        if self.gestures.len() > MAX_GESTURE_CHANNELS {
            return Err(FluxError::InvalidConfig(format!(
                "at most {} gesture channels are supported, found {}",
                MAX_GESTURE_CHANNELS,
                self.gestures.len()
            )));
        }

        for (idx, g) in self.gestures.iter().enumerate() {
            if g.joint >= CHANNEL_COUNT {
                return Err(FluxError::InvalidConfig(format!(
                    "gesture {}: joint {} does not exist",
                    idx, g.joint
                )));
            }
            if g.press_threshold <= g.release_threshold {
                return Err(FluxError::InvalidConfig(format!(
                    "gesture {}: press threshold {} must exceed release threshold {}",
                    idx, g.press_threshold, g.release_threshold
                )));
            }
        }

        Ok(())
    }

    /// Inversion flags in channel order
    pub fn inverted_channels(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.inverted)
            .map(|(idx, _)| idx)
            .collect()
    }
}
