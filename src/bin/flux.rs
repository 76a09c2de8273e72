//! Flux CLI - Command-line interface for Finger Flux
//!
//! Commands:
//! - replay: Run captured glove.sample.v1 records through the pipeline
//! - validate: Validate sample records
//! - config: Print or check a device configuration
//! - descriptor: Dump the HID report descriptor
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use finger_flux::diagnostics;
use finger_flux::orientation::{OrientationEvent, OrientationLink, QueuedOrientation};
use finger_flux::pipeline::{HandPipeline, HeldSampler, ManualClock};
use finger_flux::report::{OutputMode, FRAME_LEN, REPORT_DESCRIPTOR, REPORT_ID};
use finger_flux::schema::{self, Recorder, SampleRecord, SCHEMA_VERSION};
use finger_flux::types::{AXIS_SLOTS, CHANNEL_COUNT};
use finger_flux::{DeviceConfig, FluxError, FLUX_VERSION, PRODUCER_NAME};

/// Flux - hand-tracking glove signal pipeline
#[derive(Parser)]
#[command(name = "flux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Turn glove sensor streams into controller reports", long_about = None)]
struct Cli {
    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay captured samples through the pipeline
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Device configuration file (defaults to the built-in table)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the initial output mode
        #[arg(long)]
        mode: Option<ModeArg>,

        /// Write a movement recording of the produced frames
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Validate sample records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to check
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Dump the HID report descriptor
    Descriptor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one frame per line)
    Ndjson,
    /// JSON array of frames
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Encoded report bytes as hex, one frame per line
    Hex,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Game,
    RawAngles,
    Debug,
    Motion,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Game => OutputMode::Game,
            ModeArg::RawAngles => OutputMode::RawAngles,
            ModeArg::Debug => OutputMode::Debug,
            ModeArg::Motion => OutputMode::Motion,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second init (e.g. under a test harness) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            output_format,
            config,
            mode,
            record,
        } => cmd_replay(
            &input,
            &output,
            output_format,
            config.as_deref(),
            mode,
            record.as_deref(),
        ),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Config { check } => cmd_config(check.as_deref()),

        Commands::Descriptor { json } => cmd_descriptor(json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, FluxCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<DeviceConfig, FluxCliError> {
    match path {
        Some(path) => Ok(DeviceConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(DeviceConfig::default()),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    output_format: OutputFormat,
    config: Option<&Path>,
    mode: Option<ModeArg>,
    record: Option<&Path>,
) -> Result<(), FluxCliError> {
    let mut config = load_config(config)?;
    if let Some(mode) = mode {
        config.initial_mode = mode.into();
    }

    let records = schema::parse_ndjson(&read_input(input)?)?;
    check_replay_input(&records)?;

    let frames = replay(&records, config, record)?;
    info!(records = records.len(), frames = frames.len(), "replay complete");

    let output_data = format_output(&frames, &output_format)?;
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", output_data)?;
        stdout.flush()?;
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

/// Replay needs at least one record and a stream whose time never goes backwards
fn check_replay_input(records: &[SampleRecord]) -> Result<(), FluxCliError> {
    if records.is_empty() {
        return Err(FluxCliError::NoRecords);
    }
    match schema::validate_records(records).into_iter().next() {
        Some(invalid) => {
            warn!(index = invalid.index, t_ms = invalid.t_ms, "replay input rejected");
            Err(invalid.error.into())
        }
        None => Ok(()),
    }
}

fn replay(
    records: &[SampleRecord],
    config: DeviceConfig,
    record: Option<&Path>,
) -> Result<Vec<FrameOutput>, FluxCliError> {
    let mut pipeline = HandPipeline::with_config(config)?;
    let mut orientation = OrientationLink::attach(QueuedOrientation::new())?;
    let clock = ManualClock::new(records[0].t_ms);
    let mut sampler = HeldSampler::default();
    let mut recorder = record.map(|_| Recorder::start(records[0].t_ms));

    let mut frames = Vec::new();
    for sample in records {
        clock.set(sample.t_ms);

        if sample.sensor_reset {
            orientation.device_mut().push(OrientationEvent::Reset);
        }
        if let Some(rotation) = sample.rotation {
            orientation
                .device_mut()
                .push(OrientationEvent::Rotation(rotation));
        }
        orientation.poll(pipeline.orientation_mut());

        let input = sample.to_input();
        sampler.set(input.raw);
        let cycle = pipeline.step(&input, &mut sampler, &clock);

        if let Some(frame) = cycle.frame {
            if let Some(recorder) = recorder.as_mut() {
                recorder.capture(&frame, sample.t_ms);
            }
            frames.push(FrameOutput {
                t_ms: sample.t_ms,
                mode: pipeline.mode(),
                buttons: frame.buttons,
                axes: frame.axes,
                bytes: frame.to_bytes(),
            });
        } else {
            debug!(t_ms = sample.t_ms, "no frame (disconnected)");
        }
    }

    if let (Some(path), Some(recorder)) = (record, recorder) {
        let recording = recorder.finish();
        fs::write(path, recording.to_json()?)?;
        info!(path = %path.display(), frames = recording.len(), "recording written");
    }

    Ok(frames)
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), FluxCliError> {
    let records = schema::parse_ndjson(&read_input(input)?)?;
    let results = schema::validate_records(&records);

    let report = ValidationReport {
        schema_version: SCHEMA_VERSION.to_string(),
        total_records: records.len(),
        valid_records: records.len() - results.len(),
        invalid_records: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                t_ms: r.t_ms,
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {} (t_ms {}): {}", err.index, err.t_ms, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(FluxCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_config(check: Option<&Path>) -> Result<(), FluxCliError> {
    let config = load_config(check)?;
    println!("{}", config.to_json()?);
    Ok(())
}

fn cmd_descriptor(json: bool) -> Result<(), FluxCliError> {
    if json {
        let report = DescriptorReport {
            report_id: REPORT_ID,
            frame_len: FRAME_LEN,
            axis_slots: AXIS_SLOTS,
            descriptor: REPORT_DESCRIPTOR.to_vec(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("HID report descriptor ({} bytes)", REPORT_DESCRIPTOR.len());
        println!("{}", diagnostics::hex_dump(REPORT_DESCRIPTOR));
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Flux version {}", FLUX_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    checks.push(DoctorCheck {
        name: "frame_layout".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "{} channels, {} axis slots, {} byte frames",
            CHANNEL_COUNT, AXIS_SLOTS, FRAME_LEN
        ),
    });

    if let Some(config_path) = config {
        checks.push(check_config_file(config_path));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay input ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Flux Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_config_file(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Configuration file does not exist".to_string(),
        };
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read configuration file: {}", e),
            };
        }
    };

    match DeviceConfig::from_json(&content) {
        Ok(config) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Configuration valid ({} gestures, inverted channels {:?}, initial mode {})",
                config.gestures.len(),
                config.inverted_channels(),
                config.initial_mode.as_str()
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

// Helper functions

fn format_output(frames: &[FrameOutput], format: &OutputFormat) -> Result<String, FluxCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for frame in frames {
                lines.push(serde_json::to_string(frame)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(frames)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(frames)?),
        OutputFormat::Hex => {
            let mut out = String::new();
            for frame in frames {
                for byte in frame.bytes.iter() {
                    out.push_str(&format!("{:02x}", byte));
                }
                out.push('\n');
            }
            Ok(out)
        }
    }
}

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Flux(FluxError),
    Json(serde_json::Error),
    Validation(schema::ValidationError),
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<FluxError> for FluxCliError {
    fn from(e: FluxError) -> Self {
        FluxCliError::Flux(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

impl From<schema::ValidationError> for FluxCliError {
    fn from(e: schema::ValidationError) -> Self {
        FluxCliError::Validation(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Flux(FluxError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'flux config' to see a valid configuration".to_string()),
            },
            FluxCliError::Flux(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Ensure input matches {} schema", SCHEMA_VERSION)),
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::Validation(e) => CliError {
                code: "VALIDATION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'flux validate' for details".to_string()),
            },
            FluxCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No sample records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            FluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct FrameOutput {
    t_ms: u64,
    mode: OutputMode,
    buttons: u16,
    axes: [u8; AXIS_SLOTS],
    #[serde(skip)]
    bytes: [u8; FRAME_LEN],
}

#[derive(serde::Serialize)]
struct ValidationReport {
    schema_version: String,
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    t_ms: u64,
    error: String,
}

#[derive(serde::Serialize)]
struct DescriptorReport {
    report_id: u8,
    frame_len: usize,
    axis_slots: usize,
    descriptor: Vec<u8>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
