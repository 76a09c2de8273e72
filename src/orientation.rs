//! Orientation conversion
//!
//! Converts the rotation vector of the hand's IMU into yaw/pitch/roll and keeps
//! the latest sample for the report assembler. Also owns the link to the
//! orientation device: probing at startup and re-arming the rotation report
//! after the device resets.

use std::collections::VecDeque;
use std::f64::consts::PI;

use tracing::{info, warn};

use crate::error::FluxError;
use crate::types::{Euler, OrientationSample, Quaternion, SensorQuaternion};

const RAD_TO_DEG: f64 = 180.0 / PI;

/// Quaternion to Euler conversion with the glove's axis conventions
pub struct OrientationConverter;

impl OrientationConverter {
    /// Raw Euler angles in degrees, before the 180° re-centering.
    ///
    /// Operates on the remapped quaternion; pitch is negated.
    pub fn raw_euler(q: &Quaternion) -> Euler {
        let sqr = q.w * q.w;
        let sqi = q.x * q.x;
        let sqj = q.y * q.y;
        let sqk = q.z * q.z;

        let pitch = (2.0 * (q.x * q.y + q.z * q.w)).atan2(sqi - sqj - sqk + sqr);
        let yaw_arg = -2.0 * (q.x * q.z - q.y * q.w) / (sqi + sqj + sqk + sqr);
        // rounding can push a unit quaternion just past ±1
        let yaw = yaw_arg.clamp(-1.0, 1.0).asin();
        let roll = (2.0 * (q.y * q.z + q.x * q.w)).atan2(-sqi - sqj + sqk + sqr);

        Euler {
            yaw: yaw * RAD_TO_DEG,
            pitch: -pitch * RAD_TO_DEG,
            roll: roll * RAD_TO_DEG,
        }
    }

    /// Euler angles in degrees with every axis shifted by 180° toward zero.
    ///
    /// The rest pose of the glove sits near ±180° in the raw result; the shift
    /// moves it to 0 and moves the discontinuity to the rest pose's opposite.
    pub fn to_euler(q: &Quaternion) -> Euler {
        let raw = Self::raw_euler(q);
        Euler {
            yaw: Self::recenter(raw.yaw),
            pitch: Self::recenter(raw.pitch),
            roll: Self::recenter(raw.roll),
        }
    }

    /// Subtract 180 from non-negative angles, add 180 to negative ones.
    ///
    /// `-0.0` counts as non-negative.
    pub fn recenter(angle: f64) -> f64 {
        if angle >= 0.0 {
            angle - 180.0
        } else {
            angle + 180.0
        }
    }

    /// Overwrite `sample` with a new rotation vector from the device
    pub fn apply(sample: &mut OrientationSample, rotation: &SensorQuaternion) {
        let quaternion = rotation.remap();
        sample.quaternion = quaternion;
        sample.euler = Self::to_euler(&quaternion);
    }
}

/// Event delivered by the orientation device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrientationEvent {
    Rotation(SensorQuaternion),
    /// The device rebooted and dropped its report subscriptions
    Reset,
}

/// Hardware access to the orientation sensor
pub trait OrientationDevice {
    /// Whether the sensor answers on its bus
    fn probe(&mut self) -> bool;

    /// Subscribe to stabilized rotation-vector reports; false if refused
    fn enable_rotation_reports(&mut self) -> bool;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<OrientationEvent>;
}

/// An attached orientation device
pub struct OrientationLink<D: OrientationDevice> {
    device: D,
    resets: u32,
}

impl<D: OrientationDevice> OrientationLink<D> {
    /// Probe the device and enable the rotation report.
    ///
    /// A missing device is an error; the host decides how to stop (see
    /// [`crate::pipeline::halt_forever`]).
    pub fn attach(mut device: D) -> Result<Self, FluxError> {
        if !device.probe() {
            return Err(FluxError::DeviceUnavailable(
                "failed to find orientation sensor".to_string(),
            ));
        }
        info!("orientation sensor found");

        let mut link = Self { device, resets: 0 };
        link.arm();
        Ok(link)
    }

    fn arm(&mut self) {
        if !self.device.enable_rotation_reports() {
            warn!("could not enable stabilized rotation vector");
        }
    }

    /// Drain pending events into `sample`.
    ///
    /// Returns true if at least one rotation was applied.
    pub fn poll(&mut self, sample: &mut OrientationSample) -> bool {
        let mut updated = false;
        while let Some(event) = self.device.poll_event() {
            match event {
                OrientationEvent::Rotation(rotation) => {
                    OrientationConverter::apply(sample, &rotation);
                    updated = true;
                }
                OrientationEvent::Reset => {
                    self.resets += 1;
                    warn!(resets = self.resets, "orientation sensor was reset");
                    self.arm();
                }
            }
        }
        updated
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

/// Device fed from the host side: events are queued by whoever owns the
/// actual sensor, and re-arm requests are counted for them to act on.
#[derive(Debug, Default)]
pub struct QueuedOrientation {
    events: VecDeque<OrientationEvent>,
    pending_arms: u32,
}

impl QueuedOrientation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: OrientationEvent) {
        self.events.push_back(event);
    }

    /// Number of report subscriptions requested since the last call
    pub fn take_arm_requests(&mut self) -> u32 {
        std::mem::take(&mut self.pending_arms)
    }
}

impl OrientationDevice for QueuedOrientation {
    fn probe(&mut self) -> bool {
        true
    }

    fn enable_rotation_reports(&mut self) -> bool {
        self.pending_arms += 1;
        true
    }

    fn poll_event(&mut self) -> Option<OrientationEvent> {
        self.events.pop_front()
    }
}
