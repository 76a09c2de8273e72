//! FFI bindings for Finger Flux
//!
//! C-compatible functions for driving the pipeline from host firmware or
//! another language. The host owns the sensors and the transport: it passes
//! raw samples in and gets encoded frame bytes back. Strings returned by this
//! module must be freed with `flux_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use crate::config::DeviceConfig;
use crate::orientation::{OrientationEvent, OrientationLink, QueuedOrientation};
use crate::pipeline::{CycleInput, HandPipeline, HeldSampler, ManualClock};
use crate::report::{FRAME_LEN, REPORT_DESCRIPTOR};
use crate::types::{SensorQuaternion, CHANNEL_COUNT};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Pipeline API
// ============================================================================

/// Opaque handle to a glove pipeline.
///
/// Calibration delays run on a virtual clock that follows the timestamps the
/// host passes to `flux_glove_step`, so no call ever blocks.
pub struct FluxGloveHandle {
    pipeline: HandPipeline,
    orientation: OrientationLink<QueuedOrientation>,
    clock: ManualClock,
}

impl FluxGloveHandle {
    fn new(pipeline: HandPipeline) -> Option<Self> {
        match OrientationLink::attach(QueuedOrientation::new()) {
            Ok(orientation) => Some(Self {
                pipeline,
                orientation,
                clock: ManualClock::new(0),
            }),
            Err(e) => {
                set_last_error(&e.to_string());
                None
            }
        }
    }
}

fn into_handle(pipeline: HandPipeline) -> *mut FluxGloveHandle {
    match FluxGloveHandle::new(pipeline) {
        Some(handle) => Box::into_raw(Box::new(handle)),
        None => ptr::null_mut(),
    }
}

/// Create a pipeline with the default configuration.
///
/// # Safety
/// - Returns a pointer that must be freed with `flux_glove_free`.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_new() -> *mut FluxGloveHandle {
    clear_last_error();
    into_handle(HandPipeline::new())
}

/// Create a pipeline from a JSON device configuration.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns NULL on error; call `flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_from_config(json: *const c_char) -> *mut FluxGloveHandle {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let pipeline = DeviceConfig::from_json(&json_str).and_then(HandPipeline::with_config);
    match pipeline {
        Ok(pipeline) => into_handle(pipeline),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a pipeline.
///
/// # Safety
/// - `glove` must be a pointer returned by `flux_glove_new` or
///   `flux_glove_from_config`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_free(glove: *mut FluxGloveHandle) {
    if !glove.is_null() {
        drop(Box::from_raw(glove));
    }
}

/// Set the inversion flag of one channel.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_set_inverted(
    glove: *mut FluxGloveHandle,
    channel: u32,
    inverted: bool,
) -> i32 {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return -1;
    }
    let handle = &mut *glove;

    match handle.pipeline.set_inverted(channel as usize, inverted) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Replace the calibration range of one channel.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_set_calibration(
    glove: *mut FluxGloveHandle,
    channel: u32,
    min: i32,
    max: i32,
) -> i32 {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return -1;
    }
    let handle = &mut *glove;

    match handle.pipeline.set_calibration(channel as usize, min, max) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Queue a rotation vector in sensor axes; applied on the next step.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_push_rotation(
    glove: *mut FluxGloveHandle,
    i: f64,
    j: f64,
    k: f64,
    real: f64,
) -> i32 {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return -1;
    }
    let handle = &mut *glove;

    handle
        .orientation
        .device_mut()
        .push(OrientationEvent::Rotation(SensorQuaternion { i, j, k, real }));
    0
}

/// Report that the orientation sensor reset.
///
/// The next step asks for the rotation report to be re-enabled; poll
/// `flux_glove_take_rearm` afterwards.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_push_reset(glove: *mut FluxGloveHandle) -> i32 {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return -1;
    }
    let handle = &mut *glove;

    handle.orientation.device_mut().push(OrientationEvent::Reset);
    0
}

/// Number of rotation report subscriptions the host should perform.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns -1 on error.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_take_rearm(glove: *mut FluxGloveHandle) -> i32 {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return -1;
    }
    let handle = &mut *glove;

    handle.orientation.device_mut().take_arm_requests() as i32
}

/// Run one cycle and write the encoded frame into `out`.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - `raw` must point to `raw_len` readable `i32` values.
/// - `out` must point to `out_len` writable bytes.
/// - Returns the number of bytes written, 0 when disconnected (no frame), or
///   -1 on error.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_step(
    glove: *mut FluxGloveHandle,
    raw: *const i32,
    raw_len: usize,
    now_ms: u64,
    connected: bool,
    mode_button: bool,
    out: *mut u8,
    out_len: usize,
) -> i32 {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return -1;
    }
    if raw.is_null() || raw_len != CHANNEL_COUNT {
        set_last_error(&format!("Expected {} raw samples", CHANNEL_COUNT));
        return -1;
    }
    if out.is_null() || out_len < FRAME_LEN {
        set_last_error(&format!("Output buffer must hold {} bytes", FRAME_LEN));
        return -1;
    }

    let handle = &mut *glove;
    let mut samples = [0i32; CHANNEL_COUNT];
    samples.copy_from_slice(slice::from_raw_parts(raw, raw_len));

    handle.clock.set(now_ms);
    handle.orientation.poll(handle.pipeline.orientation_mut());

    let input = CycleInput {
        raw: samples,
        now_ms,
        connected,
        mode_button_down: connected && mode_button,
    };
    let mut sampler = HeldSampler::new(samples);
    let output = handle.pipeline.step(&input, &mut sampler, &handle.clock);

    match output.frame {
        Some(frame) => {
            let bytes = frame.to_bytes();
            slice::from_raw_parts_mut(out, FRAME_LEN).copy_from_slice(&bytes);
            FRAME_LEN as i32
        }
        None => 0,
    }
}

/// Current output mode as JSON string (`"game"`, `"raw_angles"`, ...).
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns a newly allocated string that must be freed with `flux_free_string`.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_mode(glove: *const FluxGloveHandle) -> *mut c_char {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return ptr::null_mut();
    }
    let handle = &*glove;

    string_to_cstr(handle.pipeline.mode().as_str())
}

/// Serialize the active configuration.
///
/// # Safety
/// - `glove` must be a valid handle.
/// - Returns a newly allocated string that must be freed with `flux_free_string`.
/// - Returns NULL on error; call `flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn flux_glove_config_json(glove: *const FluxGloveHandle) -> *mut c_char {
    clear_last_error();

    if glove.is_null() {
        set_last_error("Null glove pointer");
        return ptr::null_mut();
    }
    let handle = &*glove;

    match handle.pipeline.config().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Report Descriptor
// ============================================================================

/// HID report descriptor matching the frames produced by `flux_glove_step`.
///
/// # Safety
/// - `len` must be a valid pointer or NULL.
/// - Returns a pointer to static data. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn flux_report_descriptor(len: *mut usize) -> *const u8 {
    if !len.is_null() {
        *len = REPORT_DESCRIPTOR.len();
    }
    REPORT_DESCRIPTOR.as_ptr()
}

/// Size in bytes of an encoded frame.
#[no_mangle]
pub extern "C" fn flux_frame_len() -> usize {
    FRAME_LEN
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn flux_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Flux function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn flux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Flux library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn flux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
