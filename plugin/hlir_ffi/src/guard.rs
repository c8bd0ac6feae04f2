//! Outermost frame of every export: runs the body under `catch_unwind` and
//! turns whatever comes back into a return value plus an error record.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use docbridge_core::{BridgeError, BridgeResult, ErrorKind, HlirError};

use crate::buffer;

/// Write a success status. Any message pointer already in the record is
/// overwritten, not freed: it belongs to the caller.
///
/// # Safety
/// `err` must be null or point at a writable `HlirError`.
pub unsafe fn write_success(err: *mut HlirError) {
    if let Some(rec) = unsafe { err.as_mut() } {
        rec.code = ErrorKind::Success.code();
        rec.message = ptr::null_mut();
    }
}

/// Record `failure` with a freshly allocated message, released by the caller
/// through `hlir_free_buffer` or `hlir_error_reset`.
///
/// # Safety
/// `err` must be null or point at a writable `HlirError`.
pub unsafe fn write_failure(err: *mut HlirError, failure: &BridgeError) {
    if let Some(rec) = unsafe { err.as_mut() } {
        rec.code = failure.code();
        rec.message = buffer::alloc_message(&failure.to_string());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `body`, returning `failed` on error or panic. `fault` is the kind a
/// panic is reported as.
///
/// # Safety
/// `err` must be null or point at a writable `HlirError` for the whole call.
pub unsafe fn guarded<T, F>(op: &str, err: *mut HlirError, fault: ErrorKind, failed: T, body: F) -> T
where
    F: FnOnce() -> BridgeResult<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => {
            unsafe { write_success(err) };
            value
        }
        Ok(Err(e)) => {
            log::warn!("{} failed: {}", op, e);
            unsafe { write_failure(err, &e) };
            failed
        }
        Err(payload) => {
            let e = BridgeError::new(fault, format!("internal fault in {}: {}", op, panic_message(payload.as_ref())));
            log::error!("{}", e);
            unsafe { write_failure(err, &e) };
            failed
        }
    }
}

/// Same containment for operations with no error channel (releases).
pub fn absorb<F: FnOnce()>(op: &str, body: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
        log::error!("internal fault in {}: {}", op, panic_message(payload.as_ref()));
    }
}
