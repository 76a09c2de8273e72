//! Human-readable diagnostics
//!
//! Text renderings of the pipeline state for serial-plotter style output.
//! The line formats are informational and may change.

use tracing::{debug, info};

use crate::gesture::GestureDetector;
use crate::types::JointTable;

fn polarity(inverted: bool) -> &'static str {
    if inverted {
        "Inverted"
    } else {
        "Normal"
    }
}

pub fn joint_line(channel: usize, value: i32, inverted: bool) -> String {
    format!("Joint_{}:{} ({})", channel, value, polarity(inverted))
}

/// One line per channel with the latest raw sample
pub fn raw_lines(joints: &JointTable) -> Vec<String> {
    joints
        .iter()
        .enumerate()
        .map(|(idx, ch)| joint_line(idx, ch.raw_value, ch.inverted))
        .collect()
}

/// One line per channel with the normalized angle
pub fn angle_lines(joints: &JointTable) -> Vec<String> {
    joints
        .iter()
        .enumerate()
        .map(|(idx, ch)| joint_line(idx, ch.angle, ch.inverted))
        .collect()
}

/// Angle change since the previous cycle, per channel
pub fn delta_lines(joints: &JointTable) -> Vec<String> {
    joints
        .iter()
        .enumerate()
        .map(|(idx, ch)| format!("Joint_{}_delta:{}", idx, ch.angle - ch.previous_angle))
        .collect()
}

pub fn calibration_summary(gestures: &GestureDetector) -> Vec<String> {
    gestures
        .channels()
        .iter()
        .enumerate()
        .map(|(idx, ch)| {
            let average = ch
                .measured_average()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "Finger {} (joint {}): baseline={} measured={} press>{} release<{}",
                idx + 1,
                ch.joint(),
                ch.baseline_angle(),
                average,
                ch.config().press_threshold,
                ch.config().release_threshold
            )
        })
        .collect()
}

/// Hex dump, 8 bytes per line
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("0x{:02X}", b))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join(",\n")
}

pub fn log_raw(joints: &JointTable) {
    for line in raw_lines(joints) {
        debug!(target: "finger_flux::diagnostics", "{}", line);
    }
}

pub fn log_angles(joints: &JointTable) {
    for line in angle_lines(joints) {
        debug!(target: "finger_flux::diagnostics", "{}", line);
    }
}

pub fn log_calibration(gestures: &GestureDetector) {
    for line in calibration_summary(gestures) {
        info!(target: "finger_flux::diagnostics", "{}", line);
    }
}

pub fn log_deltas(joints: &JointTable) {
    for line in delta_lines(joints) {
        debug!(target: "finger_flux::diagnostics", "{}", line);
    }
}
