//! Pipeline orchestration
//!
//! This module provides the public API for Finger Flux. It owns the whole
//! pipeline state and runs one cycle at a time: raw samples → calibration →
//! gesture detection → report assembly → frame for the transport.
//!
//! The pipeline is single-threaded and poll-driven. Collaborators (sensor
//! sampling, transport, time) are passed in through the traits below.

use std::cell::Cell;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::calibration::CalibrationMapper;
use crate::config::DeviceConfig;
use crate::diagnostics;
use crate::error::FluxError;
use crate::gesture::GestureDetector;
use crate::orientation::{OrientationConverter, OrientationDevice, OrientationLink};
use crate::report::{ModeButton, OutputMode, ReportAssembler};
use crate::types::{
    ControllerFrame, JointTable, OrientationSample, RawSamples, SensorQuaternion, CHANNEL_COUNT,
};

/// Minimum spacing of periodic diagnostic output
pub const DIAGNOSTIC_INTERVAL_MS: u64 = 100;

/// Monotonic time source with a blocking delay
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Virtual clock: sleeping advances time instantly
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Move to `ms`; never goes backwards
    pub fn set(&self, ms: u64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

/// On-demand access to the positional sensors
pub trait JointSampler {
    fn sample(&mut self) -> RawSamples;
}

/// Sampler that keeps returning the last samples it was given
#[derive(Debug, Clone, Copy)]
pub struct HeldSampler {
    samples: RawSamples,
}

impl HeldSampler {
    pub fn new(samples: RawSamples) -> Self {
        Self { samples }
    }

    pub fn set(&mut self, samples: RawSamples) {
        self.samples = samples;
    }
}

impl Default for HeldSampler {
    fn default() -> Self {
        Self::new([0; CHANNEL_COUNT])
    }
}

impl JointSampler for HeldSampler {
    fn sample(&mut self) -> RawSamples {
        self.samples
    }
}

/// Wireless link to the host
pub trait Transport {
    fn is_connected(&self) -> bool;

    /// Current level of the mode button
    fn mode_button_down(&mut self) -> bool;

    fn deliver(&mut self, frame: &ControllerFrame);

    /// Called once after the host goes away
    fn restart_advertising(&mut self) {}
}

/// Inputs of a single cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleInput {
    pub raw: RawSamples,
    pub now_ms: u64,
    pub connected: bool,
    pub mode_button_down: bool,
}

/// Connection state change observed at the start of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Connected,
    Disconnected,
}

/// Result of a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutput {
    /// `None` while disconnected
    pub frame: Option<ControllerFrame>,
    pub link: Option<LinkChange>,
}

/// Pipeline context: every piece of state the cycle reads or writes
pub struct HandPipeline {
    config: DeviceConfig,
    joints: JointTable,
    gestures: GestureDetector,
    orientation: OrientationSample,
    assembler: ReportAssembler,
    mode_button: ModeButton,
    connected: bool,
    cycles: u64,
    last_diagnostic_ms: Option<u64>,
}

impl Default for HandPipeline {
    fn default() -> Self {
        Self::build(DeviceConfig::default())
    }
}

impl HandPipeline {
    /// Create a pipeline with the boot-time configuration table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline from a custom configuration
    pub fn with_config(config: DeviceConfig) -> Result<Self, FluxError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: DeviceConfig) -> Self {
        let joints = JointTable::from_config(&config.channels);
        let gestures = GestureDetector::from_config(&config);
        let assembler = ReportAssembler::new(config.initial_mode, config.deadzone);
        Self {
            config,
            joints,
            gestures,
            orientation: OrientationSample::default(),
            assembler,
            mode_button: ModeButton::new(),
            connected: false,
            cycles: 0,
            last_diagnostic_ms: None,
        }
    }

    /// Flip the polarity of one channel
    pub fn set_inverted(&mut self, channel: usize, inverted: bool) -> Result<(), FluxError> {
        let ch = self
            .joints
            .get_mut(channel)
            .ok_or(FluxError::ChannelOutOfRange(channel))?;
        ch.inverted = inverted;
        self.config.channels[channel].inverted = inverted;
        Ok(())
    }

    /// Replace the calibration range of one channel
    pub fn set_calibration(&mut self, channel: usize, min: i32, max: i32) -> Result<(), FluxError> {
        if max < min {
            return Err(FluxError::InvalidConfig(format!(
                "channel {}: max ({}) is below min ({})",
                channel, max, min
            )));
        }
        let ch = self
            .joints
            .get_mut(channel)
            .ok_or(FluxError::ChannelOutOfRange(channel))?;
        ch.range.min = min;
        ch.range.max = max;
        self.config.channels[channel].min = min;
        self.config.channels[channel].max = max;
        Ok(())
    }

    /// Store a new rotation from the orientation sensor
    pub fn apply_rotation(&mut self, rotation: &SensorQuaternion) {
        OrientationConverter::apply(&mut self.orientation, rotation);
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn joints(&self) -> &JointTable {
        &self.joints
    }

    pub fn gestures(&self) -> &GestureDetector {
        &self.gestures
    }

    pub fn orientation(&self) -> &OrientationSample {
        &self.orientation
    }

    pub fn orientation_mut(&mut self) -> &mut OrientationSample {
        &mut self.orientation
    }

    pub fn mode(&self) -> OutputMode {
        self.assembler.mode()
    }

    /// Cycle to the next output mode, as the mode button does
    pub fn next_mode(&mut self) -> OutputMode {
        self.assembler.next_mode()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn observe_link(&mut self, connected: bool) -> Option<LinkChange> {
        let change = match (self.connected, connected) {
            (false, true) => Some(LinkChange::Connected),
            (true, false) => Some(LinkChange::Disconnected),
            _ => None,
        };
        match change {
            Some(LinkChange::Connected) => info!("connected, starting to send data"),
            Some(LinkChange::Disconnected) => info!("disconnected"),
            None => {}
        }
        self.connected = connected;
        change
    }

    /// Run one cycle.
    ///
    /// All joint angles are recomputed before gestures or the assembler read
    /// them. While disconnected the angles are still refreshed but no frame is
    /// produced. The first connected cycle runs the blocking gesture baseline
    /// calibration, pulling fresh samples from `sampler`.
    pub fn step(
        &mut self,
        input: &CycleInput,
        sampler: &mut dyn JointSampler,
        clock: &dyn Clock,
    ) -> CycleOutput {
        self.cycles += 1;
        let link = self.observe_link(input.connected);

        CalibrationMapper::apply(&mut self.joints, &input.raw);

        if !input.connected {
            return CycleOutput { frame: None, link };
        }

        if self.mode_button.observe(input.mode_button_down) {
            self.assembler.next_mode();
        }

        if !self.gestures.is_calibrated() {
            let mut scratch = self.joints.clone();
            self.gestures.calibrate(clock, |joint| {
                CalibrationMapper::apply(&mut scratch, &sampler.sample());
                scratch.angle(joint)
            });
            diagnostics::log_calibration(&self.gestures);
        }
        self.gestures.update(&self.joints, input.now_ms);

        let frame = self
            .assembler
            .assemble(&self.joints, &self.gestures, &self.orientation);

        self.emit_diagnostics(input.now_ms);

        CycleOutput {
            frame: Some(frame),
            link,
        }
    }

    fn emit_diagnostics(&mut self, now_ms: u64) {
        let changed = self.assembler.take_mode_changed();
        let due = self
            .last_diagnostic_ms
            .map(|last| now_ms.saturating_sub(last) > DIAGNOSTIC_INTERVAL_MS)
            .unwrap_or(true);

        if !(changed || due) {
            return;
        }
        self.last_diagnostic_ms = Some(now_ms);

        match self.assembler.mode() {
            OutputMode::Debug => {
                diagnostics::log_raw(&self.joints);
                diagnostics::log_deltas(&self.joints);
            }
            OutputMode::RawAngles => diagnostics::log_angles(&self.joints),
            OutputMode::Game | OutputMode::Motion => {}
        }
    }

    /// Sample, step, and deliver one frame through `transport`
    pub fn run_once(
        &mut self,
        sampler: &mut dyn JointSampler,
        transport: &mut dyn Transport,
        clock: &dyn Clock,
    ) -> CycleOutput {
        let connected = transport.is_connected();
        let input = CycleInput {
            raw: sampler.sample(),
            now_ms: clock.now_ms(),
            connected,
            mode_button_down: connected && transport.mode_button_down(),
        };

        let output = self.step(&input, sampler, clock);

        if output.link == Some(LinkChange::Disconnected) {
            transport.restart_advertising();
        }

        if let Some(frame) = &output.frame {
            transport.deliver(frame);
            clock.sleep_ms(self.config.cycle_delay_ms);
        }

        output
    }

    /// Drain orientation events, then run one cycle
    pub fn run_cycle<D: OrientationDevice>(
        &mut self,
        sampler: &mut dyn JointSampler,
        transport: &mut dyn Transport,
        orientation: &mut OrientationLink<D>,
        clock: &dyn Clock,
    ) -> CycleOutput {
        orientation.poll(&mut self.orientation);
        self.run_once(sampler, transport, clock)
    }

    /// Run cycles for the lifetime of the process
    pub fn run_forever<D: OrientationDevice>(
        &mut self,
        sampler: &mut dyn JointSampler,
        transport: &mut dyn Transport,
        orientation: &mut OrientationLink<D>,
        clock: &dyn Clock,
    ) -> ! {
        loop {
            self.run_cycle(sampler, transport, orientation, clock);
        }
    }
}

/// Attach the orientation device, or stop here for good if it is missing
pub fn attach_or_halt<D: OrientationDevice>(device: D, clock: &dyn Clock) -> OrientationLink<D> {
    match OrientationLink::attach(device) {
        Ok(link) => link,
        Err(e) => {
            error!("{}", e);
            halt_forever(clock)
        }
    }
}

/// Block the calling thread forever in short waits
pub fn halt_forever(clock: &dyn Clock) -> ! {
    loop {
        clock.sleep_ms(10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::{OrientationEvent, QueuedOrientation};
    use crate::report::FRAME_LEN;
    use crate::types::{AXIS_CENTER, SensorQuaternion};
    use pretty_assertions::assert_eq;

    fn at_min(config: &DeviceConfig) -> RawSamples {
        std::array::from_fn(|i| config.channels[i].min)
    }

    fn input(raw: RawSamples, now_ms: u64, connected: bool, button: bool) -> CycleInput {
        CycleInput {
            raw,
            now_ms,
            connected,
            mode_button_down: button,
        }
    }

    struct RecordingTransport {
        connected: bool,
        button: bool,
        delivered: Vec<ControllerFrame>,
        advertising_restarts: u32,
    }

    impl RecordingTransport {
        fn new(connected: bool) -> Self {
            Self {
                connected,
                button: false,
                delivered: Vec::new(),
                advertising_restarts: 0,
            }
        }
    }

    impl Transport for RecordingTransport {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn mode_button_down(&mut self) -> bool {
            self.button
        }

        fn deliver(&mut self, frame: &ControllerFrame) {
            self.delivered.push(*frame);
        }

        fn restart_advertising(&mut self) {
            self.advertising_restarts += 1;
        }
    }

    #[test]
    fn test_disconnected_skips_frame() {
        let mut pipeline = HandPipeline::new();
        let config = pipeline.config().clone();
        let mut sampler = HeldSampler::new(at_min(&config));
        let clock = ManualClock::new(0);

        let out = pipeline.step(&input(at_min(&config), 0, false, false), &mut sampler, &clock);
        assert_eq!(out.frame, None);
        assert_eq!(out.link, None);
        // Angles still refresh while offline
        assert_eq!(pipeline.joints().angle(5), 240);
        assert!(!pipeline.gestures().is_calibrated());
    }

    #[test]
    fn test_first_connected_cycle_calibrates() {
        let mut pipeline = HandPipeline::new();
        let config = pipeline.config().clone();
        let mut sampler = HeldSampler::new(at_min(&config));
        let clock = ManualClock::new(0);

        let out = pipeline.step(&input(at_min(&config), 0, true, false), &mut sampler, &clock);
        assert_eq!(out.link, Some(LinkChange::Connected));
        assert!(out.frame.is_some());
        assert!(pipeline.gestures().is_calibrated());
        // 500 settle + 4 channels * 10 samples * 20 ms
        assert_eq!(clock.now_ms(), 1_300);

        // Calibration leaves the cycle's own angles untouched
        assert_eq!(pipeline.joints().angle(5), 240);
    }

    #[test]
    fn test_debug_mode_frame() {
        let mut pipeline = HandPipeline::new();
        let config = pipeline.config().clone();
        let raw = at_min(&config);
        let mut sampler = HeldSampler::new(raw);
        let clock = ManualClock::new(0);

        assert_eq!(pipeline.mode(), OutputMode::Debug);
        let frame = pipeline
            .step(&input(raw, 0, true, false), &mut sampler, &clock)
            .frame
            .unwrap();

        // inverted MCP flexion at its raw minimum sits at the top of its span
        assert_eq!(frame.axes[5], 240);
        assert_eq!(frame.axes[6], 0);
        assert_eq!(frame.axes[16], AXIS_CENTER);
        assert_eq!(frame.to_bytes().len(), FRAME_LEN);
    }

    #[test]
    fn test_raw_angles_mode_frame() {
        let mut config = DeviceConfig::default();
        config.initial_mode = OutputMode::RawAngles;
        let mut pipeline = HandPipeline::with_config(config.clone()).unwrap();
        let raw = at_min(&config);
        let mut sampler = HeldSampler::new(raw);
        let clock = ManualClock::new(0);

        let frame = pipeline
            .step(&input(raw, 0, true, false), &mut sampler, &clock)
            .frame
            .unwrap();
        assert_eq!(frame.axes[5], 240);
        assert_eq!(frame.axes[6], 0);
    }

    #[test]
    fn test_mode_button_cycles_on_release() {
        let mut pipeline = HandPipeline::new();
        let config = pipeline.config().clone();
        let raw = at_min(&config);
        let mut sampler = HeldSampler::new(raw);
        let clock = ManualClock::new(0);

        pipeline.step(&input(raw, 0, true, true), &mut sampler, &clock);
        assert_eq!(pipeline.mode(), OutputMode::Debug);
        pipeline.step(&input(raw, 10, true, false), &mut sampler, &clock);
        assert_eq!(pipeline.mode(), OutputMode::Motion);
        pipeline.step(&input(raw, 20, true, true), &mut sampler, &clock);
        pipeline.step(&input(raw, 30, true, false), &mut sampler, &clock);
        assert_eq!(pipeline.mode(), OutputMode::Game);
    }

    #[test]
    fn test_game_mode_presses_button() {
        let mut config = DeviceConfig::default();
        config.initial_mode = OutputMode::Game;
        let mut pipeline = HandPipeline::with_config(config.clone()).unwrap();
        let low = at_min(&config);
        let mut sampler = HeldSampler::new(low);
        let clock = ManualClock::new(0);

        let out = pipeline.step(&input(low, 2_000, true, false), &mut sampler, &clock);
        // Inverted MCP channels at their raw minimum read 240, past every press threshold
        assert_eq!(out.frame.unwrap().buttons & 0b1111, 0b1111);

        // At their raw maximum the inverted channels read 0 and release
        let high: RawSamples = std::array::from_fn(|i| config.channels[i].max);
        let out = pipeline.step(&input(high, 2_100, true, false), &mut sampler, &clock);
        assert_eq!(out.frame.unwrap().buttons & 0b1111, 0);
    }

    #[test]
    fn test_reconfiguration() {
        let mut pipeline = HandPipeline::new();
        assert!(pipeline.set_inverted(5, false).is_ok());
        assert!(!pipeline.joints().get(5).unwrap().inverted);
        assert!(!pipeline.config().channels[5].inverted);

        assert!(matches!(
            pipeline.set_inverted(CHANNEL_COUNT, true),
            Err(FluxError::ChannelOutOfRange(16))
        ));

        assert!(pipeline.set_calibration(2, 100, 200).is_ok());
        assert_eq!(pipeline.joints().get(2).unwrap().range.max, 200);
        assert!(pipeline.set_calibration(2, 300, 200).is_err());
        assert!(pipeline.set_calibration(99, 0, 1).is_err());
    }

    #[test]
    fn test_with_config_validates() {
        let mut config = DeviceConfig::default();
        config.channels.clear();
        assert!(HandPipeline::with_config(config).is_err());
    }

    #[test]
    fn test_run_once_delivers_and_tracks_link() {
        let mut pipeline = HandPipeline::new();
        let config = pipeline.config().clone();
        let mut sampler = HeldSampler::new(at_min(&config));
        let mut transport = RecordingTransport::new(true);
        let clock = ManualClock::new(0);

        pipeline.run_once(&mut sampler, &mut transport, &clock);
        pipeline.run_once(&mut sampler, &mut transport, &clock);
        assert_eq!(transport.delivered.len(), 2);

        transport.connected = false;
        let out = pipeline.run_once(&mut sampler, &mut transport, &clock);
        assert_eq!(out.link, Some(LinkChange::Disconnected));
        assert_eq!(transport.advertising_restarts, 1);
        assert_eq!(transport.delivered.len(), 2);
    }

    #[test]
    fn test_rotation_feeds_motion_mode() {
        let mut config = DeviceConfig::default();
        config.initial_mode = OutputMode::Motion;
        let mut pipeline = HandPipeline::with_config(config.clone()).unwrap();
        let raw = at_min(&config);
        let mut sampler = HeldSampler::new(raw);
        let clock = ManualClock::new(0);

        pipeline.apply_rotation(&SensorQuaternion {
            i: 0.0,
            j: 0.0,
            k: 0.0,
            real: 1.0,
        });
        let frame = pipeline
            .step(&input(raw, 0, true, false), &mut sampler, &clock)
            .frame
            .unwrap();
        // w = 1 in slot 19, identity euler re-centered to -180 in slots 20..23
        assert_eq!(frame.axes[19], 254);
        assert_eq!(&frame.axes[20..], &[0, 0, 0]);
    }

    #[test]
    fn test_attach_or_halt_returns_present_device() {
        let clock = ManualClock::new(0);
        let mut link = attach_or_halt(QueuedOrientation::new(), &clock);
        assert_eq!(link.device_mut().take_arm_requests(), 1);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn test_run_cycle_polls_orientation_before_frame() {
        let mut config = DeviceConfig::default();
        config.initial_mode = OutputMode::Motion;
        let mut pipeline = HandPipeline::with_config(config.clone()).unwrap();
        let mut sampler = HeldSampler::new(at_min(&config));
        let mut transport = RecordingTransport::new(true);
        let clock = ManualClock::new(0);
        let mut link = attach_or_halt(QueuedOrientation::new(), &clock);

        link.device_mut().push(OrientationEvent::Rotation(SensorQuaternion {
            i: 0.0,
            j: 0.0,
            k: 0.0,
            real: 1.0,
        }));
        link.device_mut().push(OrientationEvent::Reset);

        let out = pipeline.run_cycle(&mut sampler, &mut transport, &mut link, &clock);
        let frame = out.frame.unwrap();
        assert_eq!(frame.axes[19], 254);
        assert_eq!(&frame.axes[20..], &[0, 0, 0]);
        assert_eq!(transport.delivered, vec![frame]);
        assert_eq!(link.resets(), 1);
        assert_eq!(link.device_mut().take_arm_requests(), 2);
    }

    #[test]
    fn test_manual_clock_never_rewinds() {
        let clock = ManualClock::new(100);
        clock.set(50);
        assert_eq!(clock.now_ms(), 100);
        clock.set(150);
        clock.sleep_ms(5);
        assert_eq!(clock.now_ms(), 155);
    }
}
