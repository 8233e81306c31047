//! macOS IOKit FFI for reading system idle time (HIDIdleTime).
//!
//! HIDIdleTime is the nanoseconds since the last keyboard/mouse event on
//! IOHIDSystem. Reading it needs no Accessibility permission.

use std::ffi::CString;
use std::os::raw::c_char;

use core_foundation_sys::base::{kCFAllocatorDefault, CFRelease};
use core_foundation_sys::number::{kCFNumberSInt64Type, CFNumberGetValue};
use core_foundation_sys::string::CFStringCreateWithCString;

use crate::traits::IdleError;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IOServiceGetMatchingService(master_port: u32, matching: *const core::ffi::c_void) -> u32;
    fn IOServiceMatching(name: *const c_char) -> *mut core::ffi::c_void;
    fn IORegistryEntryCreateCFProperty(
        entry: u32,
        key: *const core::ffi::c_void,
        allocator: *const core::ffi::c_void,
        options: u32,
    ) -> *const core::ffi::c_void;
    fn IOObjectRelease(object: u32) -> i32;
}

const K_IO_MASTER_PORT_DEFAULT: u32 = 0;
const K_CF_STRING_ENCODING_UTF8: u32 = 0x08000100;

fn query_failed(reason: impl Into<String>) -> IdleError {
    IdleError::QueryFailed(reason.into())
}

/// Seconds since the last user input, safe to call from any thread.
pub fn get_idle_seconds() -> Result<f64, IdleError> {
    let service_name = CString::new("IOHIDSystem").map_err(|e| query_failed(e.to_string()))?;
    let key_name = CString::new("HIDIdleTime").map_err(|e| query_failed(e.to_string()))?;

    unsafe {
        let matching = IOServiceMatching(service_name.as_ptr());
        if matching.is_null() {
            return Err(query_failed("IOServiceMatching returned null"));
        }

        // IOServiceGetMatchingService consumes `matching`
        let service = IOServiceGetMatchingService(K_IO_MASTER_PORT_DEFAULT, matching);
        if service == 0 {
            return Err(query_failed("IOHIDSystem service not found"));
        }

        let cf_key = CFStringCreateWithCString(
            kCFAllocatorDefault,
            key_name.as_ptr(),
            K_CF_STRING_ENCODING_UTF8,
        );
        if cf_key.is_null() {
            IOObjectRelease(service);
            return Err(query_failed("Failed to create CFString for HIDIdleTime"));
        }

        let cf_value = IORegistryEntryCreateCFProperty(
            service,
            cf_key as *const core::ffi::c_void,
            kCFAllocatorDefault,
            0,
        );

        CFRelease(cf_key as *const core::ffi::c_void);
        IOObjectRelease(service);

        if cf_value.is_null() {
            return Err(query_failed("HIDIdleTime property not found"));
        }

        let mut nanoseconds: i64 = 0;
        let success = CFNumberGetValue(
            cf_value as *const _,
            kCFNumberSInt64Type,
            &mut nanoseconds as *mut i64 as *mut core::ffi::c_void,
        );

        CFRelease(cf_value);

        if !success {
            return Err(query_failed("Failed to extract CFNumber value"));
        }

        Ok(nanoseconds as f64 / 1_000_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_idle_seconds_returns_reasonable_value() {
        match get_idle_seconds() {
            Ok(seconds) => {
                assert!(seconds >= 0.0, "idle time should be non-negative");
                assert!(seconds.is_finite(), "idle time should be finite");
            }
            Err(e) => {
                // Headless CI has no HID session
                eprintln!("IOKit idle time unavailable: {}", e);
            }
        }
    }
}
