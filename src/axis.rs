//! Axis encoding
//!
//! Rescales bounded signals into 8-bit axis values and applies a center
//! deadzone that keeps the remaining travel continuous.

use crate::types::AXIS_CENTER;

/// Encodes bounded signals into 8-bit axis values
pub struct AxisEncoder;

impl AxisEncoder {
    /// Clamp `angle` to `[lo, hi]` and rescale it linearly to `[0, 255]`.
    ///
    /// A degenerate range (`hi <= lo`) acts as a step at `lo`.
    pub fn encode(angle: i32, lo: i32, hi: i32) -> u8 {
        if hi <= lo {
            return if angle <= lo { 0 } else { u8::MAX };
        }

        let clamped = angle.clamp(lo, hi);
        rescale(clamped as i64, lo as i64, hi as i64, 0, 255) as u8
    }

    /// Float variant of [`AxisEncoder::encode`], used for orientation angles.
    pub fn encode_f64(value: f64, lo: f64, hi: f64) -> u8 {
        if hi <= lo || value.is_nan() {
            return AXIS_CENTER;
        }
        let clamped = value.clamp(lo, hi);
        ((clamped - lo) / (hi - lo) * 255.0).round() as u8
    }

    /// Suppress input within `deadzone / 2` of center and stretch what remains.
    ///
    /// Each side is rescaled separately so the output leaves the deadzone at
    /// center and still reaches 0 and 255 at the extremes.
    pub fn apply_deadzone(value: u8, deadzone: u8) -> u8 {
        let center = AXIS_CENTER as i64;
        let half = (deadzone / 2) as i64;
        let centered = value as i64 - center;

        if centered.abs() <= half {
            return AXIS_CENTER;
        }
        if half >= center {
            // nothing left outside the deadzone
            return AXIS_CENTER;
        }

        let offset = if centered > 0 {
            rescale(centered - half, 0, center - half, 0, center)
        } else {
            rescale(centered + half, -center + half, 0, -center, 0)
        };

        (center + offset).clamp(0, 255) as u8
    }
}

/// Linear range mapping, rounded to the nearest integer (half away from zero).
fn rescale(x: i64, in_lo: i64, in_hi: i64, out_lo: i64, out_hi: i64) -> i64 {
    let num = (x - in_lo) * (out_hi - out_lo);
    let den = in_hi - in_lo;
    let quotient = if num >= 0 {
        (2 * num + den) / (2 * den)
    } else {
        -((-2 * num + den) / (2 * den))
    };
    quotient + out_lo
}
