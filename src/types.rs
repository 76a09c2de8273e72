//! Core types for the Finger Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: joint channels, orientation samples, and the controller frame handed
//! to the transport.

use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;

/// Number of positional (Hall effect) channels on the glove
pub const CHANNEL_COUNT: usize = 16;

/// Number of 8-bit axis slots in a controller frame
pub const AXIS_SLOTS: usize = 23;

/// Number of button bits in a controller frame
pub const BUTTON_COUNT: usize = 16;

/// Neutral value for an axis slot
pub const AXIS_CENTER: u8 = 127;

/// One raw sample per channel, in sensor-native units
pub type RawSamples = [i32; CHANNEL_COUNT];

/// Digit a channel belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Digit {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Digit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Digit::Thumb => "thumb",
            Digit::Index => "index",
            Digit::Middle => "middle",
            Digit::Ring => "ring",
            Digit::Pinky => "pinky",
        }
    }
}

/// Anatomical class of a joint channel.
///
/// The class fixes the output span of the normalized angle. Abduction classes
/// are two-sided: they deflect both ways around a rest point, so their span is
/// twice the class maximum with the maximum itself as the rest position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointClass {
    McpFlexion,
    McpAbduction,
    PipFlexion,
    ThumbCmcFlexion,
    ThumbCmcAbduction,
    ThumbPipFlexion,
    /// Sensor present but not characterized; samples pass through untouched
    Unused,
}

impl JointClass {
    /// Class maximum (one side of the deflection for two-sided classes)
    pub fn max(&self) -> i32 {
        match self {
            JointClass::McpFlexion => 240,
            JointClass::McpAbduction => 80,
            JointClass::PipFlexion => 255,
            JointClass::ThumbCmcFlexion => 255,
            JointClass::ThumbCmcAbduction => 125,
            JointClass::ThumbPipFlexion => 255,
            JointClass::Unused => 0,
        }
    }

    pub fn is_two_sided(&self) -> bool {
        matches!(self, JointClass::McpAbduction | JointClass::ThumbCmcAbduction)
    }

    /// Output span, or `None` for channels that bypass calibration
    pub fn span(&self) -> Option<i32> {
        match self {
            JointClass::Unused => None,
            class if class.is_two_sided() => Some(2 * class.max()),
            class => Some(class.max()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JointClass::McpFlexion => "mcp_flexion",
            JointClass::McpAbduction => "mcp_abduction",
            JointClass::PipFlexion => "pip_flexion",
            JointClass::ThumbCmcFlexion => "thumb_cmc_flexion",
            JointClass::ThumbCmcAbduction => "thumb_cmc_abduction",
            JointClass::ThumbPipFlexion => "thumb_pip_flexion",
            JointClass::Unused => "unused",
        }
    }
}

/// Fixed joint topology of the glove, indexed by channel id
pub const TOPOLOGY: [(Digit, JointClass); CHANNEL_COUNT] = [
    (Digit::Thumb, JointClass::ThumbCmcFlexion),
    (Digit::Thumb, JointClass::ThumbCmcAbduction),
    (Digit::Thumb, JointClass::ThumbPipFlexion),
    (Digit::Thumb, JointClass::Unused),
    (Digit::Index, JointClass::McpAbduction),
    (Digit::Index, JointClass::McpFlexion),
    (Digit::Index, JointClass::PipFlexion),
    (Digit::Middle, JointClass::McpAbduction),
    (Digit::Middle, JointClass::McpFlexion),
    (Digit::Middle, JointClass::PipFlexion),
    (Digit::Ring, JointClass::McpAbduction),
    (Digit::Ring, JointClass::McpFlexion),
    (Digit::Ring, JointClass::PipFlexion),
    (Digit::Pinky, JointClass::McpAbduction),
    (Digit::Pinky, JointClass::McpFlexion),
    (Digit::Pinky, JointClass::PipFlexion),
];

/// Measured raw extrema of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRange {
    pub min: i32,
    pub max: i32,
}

/// One positional channel and its per-cycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointChannel {
    pub digit: Digit,
    pub class: JointClass,
    pub range: CalibrationRange,
    /// Magnet polarity is reversed on this sensor
    pub inverted: bool,
    /// Latest raw sample
    pub raw_value: i32,
    /// Normalized angle computed this cycle
    pub angle: i32,
    /// Normalized angle of the previous cycle
    pub previous_angle: i32,
}

/// Arena of joint channels indexed by channel id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointTable {
    channels: Vec<JointChannel>,
}

impl JointTable {
    /// Build the table from per-channel configuration.
    ///
    /// `configs` must hold one entry per channel; missing entries fall back to
    /// an empty calibration range.
    pub fn from_config(configs: &[ChannelConfig]) -> Self {
        let channels = TOPOLOGY
            .iter()
            .enumerate()
            .map(|(idx, (digit, class))| {
                let cfg = configs.get(idx).copied().unwrap_or_default();
                JointChannel {
                    digit: *digit,
                    class: *class,
                    range: CalibrationRange {
                        min: cfg.min,
                        max: cfg.max,
                    },
                    inverted: cfg.inverted,
                    raw_value: 0,
                    angle: 0,
                    previous_angle: 0,
                }
            })
            .collect();

        Self { channels }
    }

    pub fn get(&self, channel: usize) -> Option<&JointChannel> {
        self.channels.get(channel)
    }

    pub fn get_mut(&mut self, channel: usize) -> Option<&mut JointChannel> {
        self.channels.get_mut(channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JointChannel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut JointChannel> {
        self.channels.iter_mut()
    }

    /// Normalized angle of a channel, 0 for unknown ids
    pub fn angle(&self, channel: usize) -> i32 {
        self.channels.get(channel).map(|c| c.angle).unwrap_or(0)
    }

    pub fn angles(&self) -> [i32; CHANNEL_COUNT] {
        let mut angles = [0; CHANNEL_COUNT];
        for (slot, channel) in angles.iter_mut().zip(self.channels.iter()) {
            *slot = channel.angle;
        }
        angles
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Quaternion in the pipeline's (remapped) frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rotation vector as reported by the orientation sensor, in its own axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorQuaternion {
    pub i: f64,
    pub j: f64,
    pub k: f64,
    pub real: f64,
}

impl SensorQuaternion {
    /// Cross-assign the sensor axes onto the pipeline frame: x=j, y=k, z=i.
    pub fn remap(&self) -> Quaternion {
        Quaternion {
            x: self.j,
            y: self.k,
            z: self.i,
            w: self.real,
        }
    }
}

/// Euler angles in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Euler {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Latest orientation of the hand; overwritten on every rotation event
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub quaternion: Quaternion,
    pub euler: Euler,
}

/// One controller report, produced fresh every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerFrame {
    /// Button bitmask, button 1 in bit 0
    pub buttons: u16,
    pub axes: [u8; AXIS_SLOTS],
}

impl ControllerFrame {
    /// Frame with no buttons pressed and every axis at center
    pub fn neutral() -> Self {
        Self {
            buttons: 0,
            axes: [AXIS_CENTER; AXIS_SLOTS],
        }
    }

    pub fn set_button(&mut self, index: usize, pressed: bool) {
        if index >= BUTTON_COUNT {
            return;
        }
        if pressed {
            self.buttons |= 1 << index;
        } else {
            self.buttons &= !(1 << index);
        }
    }

    pub fn button(&self, index: usize) -> bool {
        index < BUTTON_COUNT && self.buttons & (1 << index) != 0
    }
}

impl Default for ControllerFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans() {
        assert_eq!(JointClass::McpFlexion.span(), Some(240));
        assert_eq!(JointClass::McpAbduction.span(), Some(160));
        assert_eq!(JointClass::ThumbCmcAbduction.span(), Some(250));
        assert_eq!(JointClass::PipFlexion.span(), Some(255));
        assert_eq!(JointClass::Unused.span(), None);
    }

    #[test]
    fn test_topology_groups() {
        let thumb = TOPOLOGY.iter().filter(|(d, _)| *d == Digit::Thumb).count();
        let index = TOPOLOGY.iter().filter(|(d, _)| *d == Digit::Index).count();
        assert_eq!(thumb, 4);
        assert_eq!(index, 3);
        assert_eq!(
            TOPOLOGY.iter().filter(|(_, c)| *c == JointClass::Unused).count(),
            1
        );
    }

    #[test]
    fn test_sensor_remap() {
        let sensor = SensorQuaternion {
            i: 0.1,
            j: 0.2,
            k: 0.3,
            real: 0.9,
        };
        let q = sensor.remap();
        assert_eq!(q, Quaternion::new(0.2, 0.3, 0.1, 0.9));
    }

    #[test]
    fn test_frame_buttons() {
        let mut frame = ControllerFrame::neutral();
        frame.set_button(0, true);
        frame.set_button(3, true);
        assert_eq!(frame.buttons, 0b1001);
        frame.set_button(0, false);
        assert!(!frame.button(0));
        assert!(frame.button(3));

        // Out-of-range bits are ignored
        frame.set_button(16, true);
        assert_eq!(frame.buttons, 0b1000);
    }

    #[test]
    fn test_table_from_short_config() {
        let table = JointTable::from_config(&[]);
        assert_eq!(table.len(), CHANNEL_COUNT);
        assert_eq!(table.get(3).map(|c| c.class), Some(JointClass::Unused));
        assert!(table.get(CHANNEL_COUNT).is_none());
    }
}
