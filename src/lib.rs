//! Finger Flux - hand-tracking glove signal pipeline
//!
//! Flux turns raw Hall-effect joint samples and an IMU rotation vector into
//! game controller reports through a deterministic per-cycle pipeline:
//! calibration → gesture detection → report assembly → frame encoding.
//!
//! ## Modules
//!
//! - **Pipeline**: joint calibration, gesture buttons, orientation and
//!   controller frame assembly, driven one cycle at a time
//! - **Schema**: captured sample streams and movement recordings for
//!   off-device replay

pub mod axis;
pub mod calibration;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod gesture;
pub mod orientation;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::DeviceConfig;
pub use error::FluxError;
pub use pipeline::{Clock, CycleInput, CycleOutput, HandPipeline, JointSampler, Transport};
pub use report::{OutputMode, FRAME_LEN, REPORT_DESCRIPTOR};
pub use types::ControllerFrame;

// Schema exports
pub use schema::{Recorder, Recording, SampleRecord, SCHEMA_VERSION};

/// Flux version reported by the CLI and the C ABI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped into generated records
pub const PRODUCER_NAME: &str = "finger-flux";
