//! FFI bindings for Stride Evolve
//!
//! This module provides C-compatible functions for driving the engine from a
//! host app. All functions use C strings (null-terminated); results are JSON
//! strings allocated by Rust that must be freed with `stride_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::EvolutionConfig;
use crate::engine::EvolutionProcessor;
use crate::phase::phase_for_weekly_total;
use crate::types::DayKey;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize a value to a newly allocated JSON C string
fn json_to_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Opaque handle to an EvolutionProcessor
pub struct StrideProcessorHandle {
    processor: EvolutionProcessor,
}

/// Borrow the processor behind a handle, recording an error on NULL
unsafe fn handle_mut<'a>(handle: *mut StrideProcessorHandle) -> Option<&'a mut EvolutionProcessor> {
    if handle.is_null() {
        set_last_error("Null processor pointer");
        return None;
    }
    Some(&mut (*handle).processor)
}

// ============================================================================
// Processor Lifecycle
// ============================================================================

/// Create a new processor.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string
///   holding an `EvolutionConfig` JSON object.
/// - Must be freed with `stride_processor_free`.
/// - Returns NULL on error; call `stride_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_new(config_json: *const c_char) -> *mut StrideProcessorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EvolutionConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string");
                return ptr::null_mut();
            }
        };
        match EvolutionConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match EvolutionProcessor::new(config) {
        Ok(processor) => Box::into_raw(Box::new(StrideProcessorHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_free(processor: *mut StrideProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Record today's step total. Returns the update as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_update_today(
    processor: *mut StrideProcessorHandle,
    steps: i64,
) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };
    json_to_cstr(&processor.update_today(steps))
}

/// Backfill a specific day (`YYYY-MM-DD`). A `goal` of 0 or less keeps the
/// day's stored goal or the configured default.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - `date` must be a valid null-terminated C string.
/// - Returns NULL on error; call `stride_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_record_day(
    processor: *mut StrideProcessorHandle,
    date: *const c_char,
    steps: i64,
    goal: i64,
) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };

    let date_str = match cstr_to_string(date) {
        Some(s) => s,
        None => {
            set_last_error("Invalid date string pointer");
            return ptr::null_mut();
        }
    };

    let day = match DayKey::parse(&date_str) {
        Ok(day) => day,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let goal = if goal > 0 { Some(goal) } else { None };
    match processor.record_day(day.date(), steps, goal) {
        Ok(update) => json_to_cstr(&update),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Notify the processor that the wall-clock date changed. Returns the decay
/// state as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_day_boundary(processor: *mut StrideProcessorHandle) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };
    json_to_cstr(&processor.handle_day_boundary().state)
}

/// Force the displayed phase back to the baseline. Returns the decay state.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_restore_to_strong(
    processor: *mut StrideProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };
    json_to_cstr(&processor.restore_to_strong().state)
}

/// Set the premium entitlement flag.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns 0 on success, -1 on a NULL processor.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_set_premium(processor: *mut StrideProcessorHandle, premium: bool) -> i32 {
    clear_last_error();

    match handle_mut(processor) {
        Some(processor) => {
            processor.set_premium(premium);
            0
        }
        None => -1,
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Full progress status as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_status(processor: *mut StrideProcessorHandle) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };
    processor.tick();
    json_to_cstr(&processor.status())
}

/// The 7-day memory window as a JSON array.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_last_7_days(processor: *mut StrideProcessorHandle) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };
    json_to_cstr(&processor.last_7_days())
}

/// Phase (1-4) earned by a weekly step total.
#[no_mangle]
pub extern "C" fn stride_phase_for_weekly_total(weekly_steps: u64) -> u8 {
    phase_for_weekly_total(weekly_steps).value()
}

// ============================================================================
// Persistence
// ============================================================================

/// Save processor state to JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
/// - Returns NULL on error; call `stride_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_save_state(processor: *mut StrideProcessorHandle) -> *mut c_char {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return ptr::null_mut();
    };

    match processor.save_state() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Load processor state from JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `stride_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `stride_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stride_processor_load_state(
    processor: *mut StrideProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(processor) = handle_mut(processor) else {
        return -1;
    };

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match processor.load_state(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Stride functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Stride function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn stride_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Stride function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn stride_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn stride_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        stride_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        unsafe {
            let processor = stride_processor_new(ptr::null());
            assert!(!processor.is_null());

            let update = take_string(stride_processor_update_today(processor, 9_000));
            let value: serde_json::Value = serde_json::from_str(&update).unwrap();
            assert_eq!(value["records"][0]["steps"], 9_000);
            assert_eq!(value["decay"]["status"], "strong");

            let week = take_string(stride_processor_last_7_days(processor));
            let days: serde_json::Value = serde_json::from_str(&week).unwrap();
            assert_eq!(days.as_array().unwrap().len(), 7);

            let status = take_string(stride_processor_status(processor));
            assert!(status.contains("weekly_total"));

            let saved = stride_processor_save_state(processor);
            assert!(!saved.is_null());

            let processor2 = stride_processor_new(ptr::null());
            assert_eq!(stride_processor_load_state(processor2, saved), 0);

            stride_free_string(saved);
            stride_processor_free(processor);
            stride_processor_free(processor2);
        }
    }

    #[test]
    fn test_ffi_config() {
        unsafe {
            let config = CString::new(r#"{"daily_goal": 10000, "premium": true}"#).unwrap();
            let processor = stride_processor_new(config.as_ptr());
            assert!(!processor.is_null());

            let update = take_string(stride_processor_update_today(processor, 9_000));
            let value: serde_json::Value = serde_json::from_str(&update).unwrap();
            assert_eq!(value["records"][0]["goal_met"], false);

            assert_eq!(stride_processor_set_premium(processor, false), 0);
            stride_processor_free(processor);

            let bad = CString::new(r#"{"daily_goal": 0}"#).unwrap();
            assert!(stride_processor_new(bad.as_ptr()).is_null());
            assert!(!stride_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let processor = stride_processor_new(ptr::null());
            let bad_date = CString::new("01/02/2024").unwrap();

            let result = stride_processor_record_day(processor, bad_date.as_ptr(), 100, 0);
            assert!(result.is_null());

            let error = stride_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("01/02/2024"));

            assert!(stride_processor_update_today(ptr::null_mut(), 10).is_null());
            assert_eq!(stride_processor_load_state(processor, ptr::null()), -1);

            stride_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_phase_and_version() {
        assert_eq!(stride_phase_for_weekly_total(30_000), 2);
        assert_eq!(stride_phase_for_weekly_total(75_000), 4);

        unsafe {
            let version = stride_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
