//! Gesture (button) detection
//!
//! Each gesture channel watches one joint and turns its continuous angle into a
//! pressed/released state. Presses and releases use separate thresholds so the
//! state does not chatter around a single crossing point, and every transition
//! is debounced per channel.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DeviceConfig, GestureConfig};
use crate::pipeline::Clock;
use crate::types::JointTable;

/// Debounced button state of a gesture channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonState {
    Released,
    Pressed,
}

/// Transition reported by [`GestureChannel::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureTransition {
    Pressed,
    Released,
}

/// Hysteresis state machine for one watched joint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureChannel {
    config: GestureConfig,
    baseline_angle: i32,
    state: ButtonState,
    last_change_ms: u64,
    /// Average seen during the calibration phase; reported, never applied
    measured_average: Option<i32>,
}

impl GestureChannel {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            baseline_angle: 0,
            state: ButtonState::Released,
            last_change_ms: 0,
            measured_average: None,
        }
    }

    /// Feed the current angle of the watched joint.
    ///
    /// A transition requires both the threshold crossing and more than
    /// `debounce_ms` since the previous transition.
    pub fn update(&mut self, current_angle: i32, now_ms: u64) -> Option<GestureTransition> {
        let distance = current_angle - self.baseline_angle;
        let settled = now_ms.saturating_sub(self.last_change_ms) > self.config.debounce_ms;

        match self.state {
            ButtonState::Released if distance > self.config.press_threshold && settled => {
                self.state = ButtonState::Pressed;
                self.last_change_ms = now_ms;
                Some(GestureTransition::Pressed)
            }
            ButtonState::Pressed if distance < self.config.release_threshold && settled => {
                self.state = ButtonState::Released;
                self.last_change_ms = now_ms;
                Some(GestureTransition::Released)
            }
            _ => None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.state == ButtonState::Pressed
    }

    pub fn state(&self) -> ButtonState {
        self.state
    }

    pub fn joint(&self) -> usize {
        self.config.joint
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn baseline_angle(&self) -> i32 {
        self.baseline_angle
    }

    pub fn measured_average(&self) -> Option<i32> {
        self.measured_average
    }
}

/// Timing of the one-shot baseline calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationPhase {
    pub settle_delay_ms: u64,
    pub samples: u32,
    pub sample_delay_ms: u64,
}

/// The set of gesture channels mapped to controller buttons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureDetector {
    channels: Vec<GestureChannel>,
    phase: CalibrationPhase,
    calibrated: bool,
}

impl GestureDetector {
    pub fn new(gestures: &[GestureConfig], phase: CalibrationPhase) -> Self {
        Self {
            channels: gestures.iter().copied().map(GestureChannel::new).collect(),
            phase,
            calibrated: false,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            &config.gestures,
            CalibrationPhase {
                settle_delay_ms: config.settle_delay_ms,
                samples: config.calibration_samples,
                sample_delay_ms: config.calibration_sample_delay_ms,
            },
        )
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Blocking baseline calibration.
    ///
    /// Waits for the sensors to settle, then takes `samples` fresh readings per
    /// channel through `read_angle`, spaced by `sample_delay_ms`. The averages
    /// are kept for reporting only: the baseline stays at 0.
    pub fn calibrate<F>(&mut self, clock: &dyn Clock, mut read_angle: F)
    where
        F: FnMut(usize) -> i32,
    {
        info!("calibrating finger baseline positions");
        clock.sleep_ms(self.phase.settle_delay_ms);

        for (idx, channel) in self.channels.iter_mut().enumerate() {
            let mut sum: i64 = 0;
            for _ in 0..self.phase.samples {
                sum += read_angle(channel.config.joint) as i64;
                clock.sleep_ms(self.phase.sample_delay_ms);
            }

            channel.measured_average = if self.phase.samples > 0 {
                Some((sum / self.phase.samples as i64) as i32)
            } else {
                None
            };
            channel.baseline_angle = 0;

            debug!(
                finger = idx,
                joint = channel.config.joint,
                baseline = channel.baseline_angle,
                measured_average = ?channel.measured_average,
                press_threshold = channel.config.press_threshold,
                release_threshold = channel.config.release_threshold,
                "finger baseline"
            );
        }

        self.calibrated = true;
        info!("calibration complete");
    }

    /// Run every channel against the current joint angles
    pub fn update(&mut self, joints: &JointTable, now_ms: u64) {
        for (idx, channel) in self.channels.iter_mut().enumerate() {
            let angle = joints.angle(channel.config.joint);
            if let Some(transition) = channel.update(angle, now_ms) {
                let threshold = match transition {
                    GestureTransition::Pressed => channel.config.press_threshold,
                    GestureTransition::Released => channel.config.release_threshold,
                };
                debug!(
                    button = idx + 1,
                    ?transition,
                    distance = angle - channel.baseline_angle,
                    threshold,
                    "gesture transition"
                );
            }
        }
    }

    pub fn channels(&self) -> &[GestureChannel] {
        &self.channels
    }

    /// Pressed flags in button order
    pub fn pressed(&self) -> impl Iterator<Item = bool> + '_ {
        self.channels.iter().map(GestureChannel::is_pressed)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ManualClock;

    const DEBOUNCE: u64 = 50;

    fn index_finger() -> GestureChannel {
        GestureChannel::new(GestureConfig {
            joint: 5,
            press_threshold: 200,
            release_threshold: 192,
            debounce_ms: DEBOUNCE,
        })
    }

    #[test]
    fn test_starts_released() {
        let channel = index_finger();
        assert_eq!(channel.state(), ButtonState::Released);
        assert_eq!(channel.baseline_angle(), 0);
    }

    #[test]
    fn test_distance_sequence() {
        let mut channel = index_finger();
        let distances = [0, 0, 205, 205, 190, 205, 190];
        let mut states = Vec::new();
        for (step, distance) in distances.iter().enumerate() {
            channel.update(*distance, 100 + step as u64 * DEBOUNCE);
            states.push(channel.state());
        }

        use ButtonState::{Pressed as P, Released as R};
        // The 205 right after a release is still inside the debounce window
        assert_eq!(states, vec![R, R, P, P, R, R, R]);
    }

    #[test]
    fn test_release_blocked_by_debounce() {
        let mut channel = index_finger();
        assert_eq!(channel.update(205, 100), Some(GestureTransition::Pressed));

        // Drops below the release threshold while still inside the window
        assert_eq!(channel.update(150, 120), None);
        assert_eq!(channel.update(150, 150), None);
        assert!(channel.is_pressed());

        assert_eq!(channel.update(150, 151), Some(GestureTransition::Released));
    }

    #[test]
    fn test_hysteresis_band_holds_state() {
        let mut channel = index_finger();
        channel.update(201, 100);
        assert!(channel.is_pressed());

        // Inside the band: neither threshold is crossed
        for t in 1..20 {
            channel.update(195, 100 + t * 100);
            assert!(channel.is_pressed());
        }

        let mut channel = index_finger();
        for t in 1..20 {
            channel.update(195, t * 100);
            assert!(!channel.is_pressed());
        }
    }

    #[test]
    fn test_never_toggles_faster_than_debounce() {
        let mut channel = index_finger();
        let mut last_transition: Option<u64> = None;
        let mut now = 0;
        // Adversarial input flipping across both thresholds every millisecond
        for step in 0..2000u64 {
            now += 1;
            let distance = if step % 2 == 0 { 250 } else { 100 };
            if channel.update(distance, now).is_some() {
                if let Some(prev) = last_transition {
                    assert!(now - prev > DEBOUNCE);
                }
                last_transition = Some(now);
            }
        }
        assert!(last_transition.is_some());
    }

    #[test]
    fn test_calibration_discards_average() {
        let gestures = [
            GestureConfig {
                joint: 5,
                press_threshold: 200,
                release_threshold: 192,
                debounce_ms: DEBOUNCE,
            },
            GestureConfig {
                joint: 8,
                press_threshold: 200,
                release_threshold: 192,
                debounce_ms: DEBOUNCE,
            },
        ];
        let phase = CalibrationPhase {
            settle_delay_ms: 500,
            samples: 10,
            sample_delay_ms: 20,
        };
        let mut detector = GestureDetector::new(&gestures, phase);
        let clock = ManualClock::new(0);
        let mut reads = Vec::new();

        detector.calibrate(&clock, |joint| {
            reads.push(joint);
            40
        });

        assert!(detector.is_calibrated());
        assert_eq!(reads.len(), 20);
        assert_eq!(reads.iter().filter(|j| **j == 8).count(), 10);
        // 500 ms settle + 2 channels * 10 samples * 20 ms
        assert_eq!(clock.now_ms(), 900);

        for channel in detector.channels() {
            assert_eq!(channel.measured_average(), Some(40));
            assert_eq!(channel.baseline_angle(), 0);
        }
    }

    #[test]
    fn test_detector_update_reads_joint_table() {
        let config = DeviceConfig::default();
        let mut detector = GestureDetector::from_config(&config);
        let mut table = JointTable::from_config(&config.channels);

        // Ring finger (joint 11) presses above 180
        table.get_mut(11).unwrap().angle = 185;
        detector.update(&table, 1_000);

        let pressed: Vec<bool> = detector.pressed().collect();
        assert_eq!(pressed, vec![false, false, true, false]);
    }
}
