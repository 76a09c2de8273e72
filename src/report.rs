//! Report assembly
//!
//! Composes joint angles, gesture buttons and orientation into the fixed
//! controller frame for the active output mode, and encodes frames into the
//! byte layout declared by [`REPORT_DESCRIPTOR`].

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::axis::AxisEncoder;
use crate::gesture::GestureDetector;
use crate::types::{
    ControllerFrame, JointTable, OrientationSample, AXIS_CENTER, AXIS_SLOTS, BUTTON_COUNT,
    CHANNEL_COUNT,
};

/// Report id of the gamepad input report
pub const REPORT_ID: u8 = 1;

/// Bytes in an encoded frame: button bitmask followed by the axes
pub const FRAME_LEN: usize = 2 + AXIS_SLOTS;

/// First axis slot carrying the orientation quaternion in motion mode
pub const QUATERNION_AXIS: usize = CHANNEL_COUNT;

/// First axis slot carrying yaw/pitch/roll in motion mode
pub const EULER_AXIS: usize = QUATERNION_AXIS + 4;

/// HID report descriptor matching [`ControllerFrame::to_bytes`]
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Gamepad)
    0xA1, 0x01, // Collection (Application)
    0x85, REPORT_ID, // Report ID
    // 16 buttons
    0x05, 0x09, // Usage Page (Button)
    0x19, 0x01, // Usage Minimum (Button 1)
    0x29, 0x10, // Usage Maximum (Button 16)
    0x15, 0x00, // Logical Minimum (0)
    0x25, 0x01, // Logical Maximum (1)
    0x75, 0x01, // Report Size (1)
    0x95, 0x10, // Report Count (16)
    0x81, 0x02, // Input (Data, Variable, Absolute)
    // X, Y, Z, Rx, Ry, Rz, Slider, Dial, Wheel
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x19, 0x30, // Usage Minimum (X)
    0x29, 0x38, // Usage Maximum (Wheel)
    0x15, 0x00, // Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, // Report Size (8)
    0x95, 0x09, // Report Count (9)
    0x81, 0x02, // Input (Data, Variable, Absolute)
    // remaining 14 axes
    0x05, 0x0A, // Usage Page (Ordinal)
    0x19, 0x01, // Usage Minimum (1)
    0x29, 0x0E, // Usage Maximum (14)
    0x15, 0x00, // Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, // Report Size (8)
    0x95, 0x0E, // Report Count (14)
    0x81, 0x02, // Input (Data, Variable, Absolute)
    0xC0, // End Collection
];

/// Mutually exclusive output modes, cycled in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Gesture buttons plus a thumb-driven stick
    Game,
    /// Every joint angle on its own axis
    RawAngles,
    /// Raw angles with per-cycle diagnostics
    Debug,
    /// Raw angles plus hand orientation
    Motion,
}

impl OutputMode {
    pub const ALL: [OutputMode; 4] = [
        OutputMode::Game,
        OutputMode::RawAngles,
        OutputMode::Debug,
        OutputMode::Motion,
    ];

    /// The mode after this one, wrapping around
    pub fn next(self) -> Self {
        match self {
            OutputMode::Game => OutputMode::RawAngles,
            OutputMode::RawAngles => OutputMode::Debug,
            OutputMode::Debug => OutputMode::Motion,
            OutputMode::Motion => OutputMode::Game,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Game => "game",
            OutputMode::RawAngles => "raw_angles",
            OutputMode::Debug => "debug",
            OutputMode::Motion => "motion",
        }
    }
}

/// Edge detector for the physical mode button; fires on release
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeButton {
    was_down: bool,
}

impl ModeButton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current level; true on a down-to-up transition
    pub fn observe(&mut self, down: bool) -> bool {
        let released = self.was_down && !down;
        self.was_down = down;
        released
    }
}

/// Builds controller frames for the active output mode
#[derive(Debug, Clone)]
pub struct ReportAssembler {
    mode: OutputMode,
    mode_just_changed: bool,
    deadzone: u8,
}

impl ReportAssembler {
    pub fn new(mode: OutputMode, deadzone: u8) -> Self {
        Self {
            mode,
            mode_just_changed: true,
            deadzone,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Advance to the next mode
    pub fn next_mode(&mut self) -> OutputMode {
        self.mode = self.mode.next();
        self.mode_just_changed = true;
        info!(mode = self.mode.as_str(), "mode changed");
        self.mode
    }

    /// Read and clear the "mode just changed" flag
    pub fn take_mode_changed(&mut self) -> bool {
        std::mem::replace(&mut self.mode_just_changed, false)
    }

    /// Map the current pipeline state to a frame for the active mode
    pub fn assemble(
        &self,
        joints: &JointTable,
        gestures: &GestureDetector,
        orientation: &OrientationSample,
    ) -> ControllerFrame {
        let mut frame = ControllerFrame::neutral();

        match self.mode {
            OutputMode::Game => self.fill_game(&mut frame, joints, gestures),
            OutputMode::RawAngles | OutputMode::Debug => fill_joints(&mut frame, joints),
            OutputMode::Motion => {
                fill_joints(&mut frame, joints);
                fill_orientation(&mut frame, orientation);
            }
        }

        frame
    }

    fn fill_game(
        &self,
        frame: &mut ControllerFrame,
        joints: &JointTable,
        gestures: &GestureDetector,
    ) {
        for (idx, pressed) in gestures.pressed().enumerate().take(BUTTON_COUNT) {
            frame.set_button(idx, pressed);
        }

        // X: thumb CMC flexion over its lower half, inverted
        let x = u8::MAX - AxisEncoder::encode(joints.angle(0), 0, 127);
        // Y: thumb CMC abduction
        let y = AxisEncoder::encode(joints.angle(1), 0, 255);

        frame.axes[0] = AxisEncoder::apply_deadzone(x, self.deadzone);
        frame.axes[1] = AxisEncoder::apply_deadzone(y, self.deadzone);
    }
}

fn fill_joints(frame: &mut ControllerFrame, joints: &JointTable) {
    for (slot, channel) in frame.axes.iter_mut().zip(joints.iter()).take(CHANNEL_COUNT) {
        *slot = AxisEncoder::encode(channel.angle, 0, 255);
    }
}

fn fill_orientation(frame: &mut ControllerFrame, orientation: &OrientationSample) {
    let q = orientation.quaternion;
    for (offset, component) in [q.x, q.y, q.z, q.w].into_iter().enumerate() {
        frame.axes[QUATERNION_AXIS + offset] = encode_unit(component);
    }

    let e = orientation.euler;
    for (offset, angle) in [e.yaw, e.pitch, e.roll].into_iter().enumerate() {
        frame.axes[EULER_AXIS + offset] = AxisEncoder::encode_f64(angle, -180.0, 180.0);
    }
}

/// Encode a value in [-1, 1] as `round(v * 127) + 127`
fn encode_unit(value: f64) -> u8 {
    if value.is_nan() {
        return AXIS_CENTER;
    }
    ((value * 127.0).round() + AXIS_CENTER as f64).clamp(0.0, 255.0) as u8
}

impl ControllerFrame {
    /// Wire layout: button bitmask (little-endian, button 1 in bit 0 of the
    /// first byte) followed by every axis slot in order.
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..2].copy_from_slice(&self.buttons.to_le_bytes());
        bytes[2..].copy_from_slice(&self.axes);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; FRAME_LEN]) -> Self {
        let mut axes = [0u8; AXIS_SLOTS];
        axes.copy_from_slice(&bytes[2..]);
        Self {
            buttons: u16::from_le_bytes([bytes[0], bytes[1]]),
            axes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::types::{Euler, Quaternion};
    use pretty_assertions::assert_eq;

    fn fixtures() -> (JointTable, GestureDetector) {
        let config = DeviceConfig::default();
        (
            JointTable::from_config(&config.channels),
            GestureDetector::from_config(&config),
        )
    }

    #[test]
    fn test_mode_cycle_wraps() {
        let mut mode = OutputMode::Game;
        for _ in 0..OutputMode::ALL.len() {
            mode = mode.next();
        }
        assert_eq!(mode, OutputMode::Game);
        assert_eq!(OutputMode::Debug.next(), OutputMode::Motion);
    }

    #[test]
    fn test_mode_changed_flag_consumed_once() {
        let mut assembler = ReportAssembler::new(OutputMode::Debug, 32);
        assert!(assembler.take_mode_changed());
        assert!(!assembler.take_mode_changed());

        assert_eq!(assembler.next_mode(), OutputMode::Motion);
        assert!(assembler.take_mode_changed());
        assert!(!assembler.take_mode_changed());
    }

    #[test]
    fn test_mode_button_fires_on_release() {
        let mut button = ModeButton::new();
        assert!(!button.observe(false));
        assert!(!button.observe(true));
        assert!(!button.observe(true));
        assert!(button.observe(false));
        assert!(!button.observe(false));
    }

    #[test]
    fn test_raw_angles_layout() {
        let (mut joints, gestures) = fixtures();
        for (idx, channel) in joints.iter_mut().enumerate() {
            channel.angle = idx as i32 * 10;
        }
        joints.get_mut(15).unwrap().angle = 400;
        joints.get_mut(14).unwrap().angle = -20;

        let assembler = ReportAssembler::new(OutputMode::RawAngles, 32);
        let frame = assembler.assemble(&joints, &gestures, &OrientationSample::default());

        assert_eq!(frame.buttons, 0);
        for idx in 0..14 {
            assert_eq!(frame.axes[idx], (idx * 10) as u8);
        }
        assert_eq!(frame.axes[14], 0);
        assert_eq!(frame.axes[15], 255);
        assert!(frame.axes[CHANNEL_COUNT..].iter().all(|a| *a == AXIS_CENTER));
    }

    #[test]
    fn test_debug_matches_raw_angles() {
        let (mut joints, gestures) = fixtures();
        joints.get_mut(7).unwrap().angle = 99;
        let orientation = OrientationSample::default();

        let raw = ReportAssembler::new(OutputMode::RawAngles, 32);
        let debug = ReportAssembler::new(OutputMode::Debug, 32);
        assert_eq!(
            raw.assemble(&joints, &gestures, &orientation),
            debug.assemble(&joints, &gestures, &orientation)
        );
    }

    #[test]
    fn test_game_layout() {
        let (mut joints, mut gestures) = fixtures();
        joints.get_mut(8).unwrap().angle = 230;
        gestures.update(&joints, 1_000);

        // Thumb angles at 0: X inverts to full deflection, Y stays at zero
        joints.get_mut(0).unwrap().angle = 0;
        joints.get_mut(1).unwrap().angle = 0;

        let assembler = ReportAssembler::new(OutputMode::Game, 32);
        let frame = assembler.assemble(&joints, &gestures, &OrientationSample::default());

        assert_eq!(frame.buttons, 0b0010);
        assert_eq!(frame.axes[0], 255);
        assert_eq!(frame.axes[1], 0);
        assert!(frame.axes[2..].iter().all(|a| *a == AXIS_CENTER));
    }

    #[test]
    fn test_game_stick_deadzone() {
        let (mut joints, gestures) = fixtures();
        // 64 of 127 on X lands inside the deadzone after inversion
        joints.get_mut(0).unwrap().angle = 64;
        joints.get_mut(1).unwrap().angle = 130;

        let assembler = ReportAssembler::new(OutputMode::Game, 32);
        let frame = assembler.assemble(&joints, &gestures, &OrientationSample::default());
        assert_eq!(frame.axes[0], AXIS_CENTER);
        assert_eq!(frame.axes[1], AXIS_CENTER);
    }

    #[test]
    fn test_motion_layout() {
        let (joints, gestures) = fixtures();
        let orientation = OrientationSample {
            quaternion: Quaternion::new(-1.0, 0.0, 0.5, 1.0),
            euler: Euler {
                yaw: -180.0,
                pitch: 0.0,
                roll: 180.0,
            },
        };

        let assembler = ReportAssembler::new(OutputMode::Motion, 32);
        let frame = assembler.assemble(&joints, &gestures, &orientation);

        assert_eq!(&frame.axes[QUATERNION_AXIS..EULER_AXIS], &[0, 127, 191, 254]);
        assert_eq!(&frame.axes[EULER_AXIS..], &[0, 128, 255]);
    }

    #[test]
    fn test_frame_bytes() {
        let mut frame = ControllerFrame::neutral();
        frame.set_button(0, true);
        frame.set_button(9, true);
        frame.axes[0] = 1;
        frame.axes[AXIS_SLOTS - 1] = 200;

        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(bytes[0], 0b0000_0001);
        assert_eq!(bytes[1], 0b0000_0010);
        assert_eq!(bytes[2], 1);
        assert_eq!(bytes[FRAME_LEN - 1], 200);
        assert_eq!(ControllerFrame::from_bytes(&bytes), frame);
    }

    #[test]
    fn test_descriptor_matches_frame_len() {
        // Sum Report Size * Report Count over every Input item
        let mut size = 0u32;
        let mut count = 0u32;
        let mut bits = 0u32;
        let mut i = 0;
        while i < REPORT_DESCRIPTOR.len() {
            let prefix = REPORT_DESCRIPTOR[i];
            let len = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            let mut value = 0u32;
            for (shift, byte) in REPORT_DESCRIPTOR[i + 1..i + 1 + len].iter().enumerate() {
                value |= (*byte as u32) << (8 * shift);
            }
            match prefix & 0xFC {
                0x74 => size = value,
                0x94 => count = value,
                0x80 => bits += size * count,
                _ => {}
            }
            i += 1 + len;
        }
        assert_eq!(bits as usize, FRAME_LEN * 8);
    }
}
