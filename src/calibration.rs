//! Positional calibration
//!
//! Maps raw Hall effect samples onto normalized joint angles using each
//! channel's measured range, joint class span and magnet polarity.

use tracing::trace;

use crate::types::{CalibrationRange, JointClass, JointTable, RawSamples};

/// Converts raw samples into normalized joint angles
pub struct CalibrationMapper;

impl CalibrationMapper {
    /// Normalize one raw sample.
    ///
    /// The ratio is not clamped: samples outside the calibrated range overshoot
    /// the span, and the axis encoder bounds them later. An empty range maps to
    /// the low end of the span (the high end when inverted). `Unused` channels
    /// return the raw sample unchanged.
    pub fn normalize(
        raw: i32,
        range: CalibrationRange,
        inverted: bool,
        class: JointClass,
    ) -> i32 {
        let span = match class.span() {
            Some(span) => span,
            None => return raw,
        };

        let width = range.max as f64 - range.min as f64;
        let ratio = if width == 0.0 {
            0.0
        } else {
            (raw as f64 - range.min as f64) / width
        };

        let angle = (ratio * span as f64).round() as i32;

        if inverted {
            Self::invert(angle, span)
        } else {
            angle
        }
    }

    /// Mirror an angle within its span
    pub fn invert(angle: i32, span: i32) -> i32 {
        span - angle
    }

    /// Recompute every channel of the table from a fresh set of raw samples
    pub fn apply(table: &mut JointTable, raw: &RawSamples) {
        for (channel, sample) in table.iter_mut().zip(raw.iter()) {
            channel.raw_value = *sample;
            channel.previous_angle = channel.angle;
            channel.angle =
                Self::normalize(*sample, channel.range, channel.inverted, channel.class);
        }
        trace!(angles = ?table.angles(), "joint angles updated");
    }
}
