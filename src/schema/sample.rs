//! glove.sample.v1 schema definition
//!
//! One record per firmware cycle: the raw positional samples, the link and
//! mode button levels, and any orientation event that arrived since the last
//! cycle. Streams are stored as NDJSON and replayed through the pipeline.

use serde::{Deserialize, Serialize};

use crate::error::FluxError;
use crate::pipeline::CycleInput;
use crate::types::{RawSamples, SensorQuaternion, CHANNEL_COUNT};

/// Current schema version
pub const SCHEMA_VERSION: &str = "glove.sample.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_connected() -> bool {
    true
}

/// One captured cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Milliseconds since capture start
    pub t_ms: u64,
    /// Raw positional samples, one per channel
    pub raw: Vec<i32>,
    #[serde(default = "default_connected")]
    pub connected: bool,
    /// Mode button level
    #[serde(default)]
    pub mode_button: bool,
    /// Rotation vector in sensor axes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<SensorQuaternion>,
    /// The orientation sensor reported a reset before this cycle
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensor_reset: bool,
}

impl SampleRecord {
    /// Create a connected record with no orientation event
    pub fn new(t_ms: u64, raw: RawSamples) -> Self {
        SampleRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            t_ms,
            raw: raw.to_vec(),
            connected: true,
            mode_button: false,
            rotation: None,
            sensor_reset: false,
        }
    }

    pub fn with_rotation(mut self, rotation: SensorQuaternion) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_mode_button(mut self, down: bool) -> Self {
        self.mode_button = down;
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Validate a single record
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        if self.raw.len() != CHANNEL_COUNT {
            return Err(ValidationError::WrongChannelCount {
                expected: CHANNEL_COUNT,
                actual: self.raw.len(),
            });
        }

        if let Some(r) = &self.rotation {
            if ![r.i, r.j, r.k, r.real].iter().all(|c| c.is_finite()) {
                return Err(ValidationError::NonFiniteRotation);
            }
        }

        Ok(())
    }

    /// Raw samples as a fixed array; short records are zero-filled
    pub fn raw_samples(&self) -> RawSamples {
        let mut raw = [0; CHANNEL_COUNT];
        for (slot, value) in raw.iter_mut().zip(self.raw.iter()) {
            *slot = *value;
        }
        raw
    }

    /// Pipeline input for this record
    pub fn to_input(&self) -> CycleInput {
        CycleInput {
            raw: self.raw_samples(),
            now_ms: self.t_ms,
            connected: self.connected,
            mode_button_down: self.connected && self.mode_button,
        }
    }
}

/// Validation errors for sample records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Expected {expected} raw samples, got {actual}")]
    WrongChannelCount { expected: usize, actual: usize },

    #[error("Rotation contains a non-finite component")]
    NonFiniteRotation,

    #[error("Timestamp {t_ms} is earlier than the previous record ({previous_ms})")]
    TimeWentBackwards { t_ms: u64, previous_ms: u64 },
}

/// Result of record validation
#[derive(Debug)]
pub struct ValidationResult {
    /// Zero-based record index
    pub index: usize,
    pub t_ms: u64,
    pub error: ValidationError,
}

/// Parse NDJSON (newline-delimited JSON) containing sample records
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<SampleRecord>, FluxError> {
    let mut records = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<SampleRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                return Err(FluxError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(records)
}

/// Serialize records as NDJSON
pub fn to_ndjson(records: &[SampleRecord]) -> Result<String, FluxError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Validate a batch of records, including timestamp ordering
pub fn validate_records(records: &[SampleRecord]) -> Vec<ValidationResult> {
    let mut results = Vec::new();
    let mut previous_ms: Option<u64> = None;

    for (index, record) in records.iter().enumerate() {
        let error = match record.validate() {
            Err(e) => Some(e),
            Ok(()) => match previous_ms {
                Some(prev) if record.t_ms < prev => Some(ValidationError::TimeWentBackwards {
                    t_ms: record.t_ms,
                    previous_ms: prev,
                }),
                _ => None,
            },
        };
        previous_ms = Some(previous_ms.map_or(record.t_ms, |p| p.max(record.t_ms)));

        if let Some(error) = error {
            results.push(ValidationResult {
                index,
                t_ms: record.t_ms,
                error,
            });
        }
    }

    results
}
