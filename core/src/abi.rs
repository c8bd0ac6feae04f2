//! file: core/src/abi.rs
//! description: C-compatible types shared by the exporting library and hosts.
//!
//! Nothing in here allocates. The handle structs are zero-sized and never
//! constructed; they only give each pointer kind its own type so a
//! `*mut DocModuleRef` cannot be passed where a buffer is expected.

use std::os::raw::{c_char, c_uchar};
use std::ptr;

use crate::error::{BridgeError, ErrorKind};

/// Bumped whenever an exported signature or the record layout changes.
pub const ABI_VERSION: u32 = 1;

/// Status record written by every fallible export.
///
/// `message` is null on success. On failure it points at a NUL-terminated
/// UTF-8 string allocated by the library; the caller owns it and releases it
/// with `hlir_free_buffer` (or `hlir_error_reset`).
#[repr(C)]
#[derive(Debug)]
pub struct HlirError {
    pub code: i32,
    pub message: *mut c_char,
}

impl HlirError {
    pub const fn new() -> Self {
        HlirError {
            code: 0,
            message: ptr::null_mut(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorKind::Success.code()
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(self.code)
    }

    /// Read the message without taking ownership of it.
    ///
    /// # Safety
    /// `message` must be null or point at a live NUL-terminated string.
    pub unsafe fn message_lossy(&self) -> Option<String> {
        if self.message.is_null() {
            return None;
        }
        let text = unsafe { std::ffi::CStr::from_ptr(self.message) };
        Some(text.to_string_lossy().into_owned())
    }

    /// Convert a failed record into a `BridgeError`, copying the message.
    /// The record keeps ownership of the message buffer.
    ///
    /// # Safety
    /// Same as [`HlirError::message_lossy`].
    pub unsafe fn to_bridge_error(&self) -> BridgeError {
        let kind = self.kind();
        let message = match unsafe { self.message_lossy() } {
            Some(text) => {
                let prefix = format!("{}: ", kind);
                text.strip_prefix(&prefix).map(str::to_string).unwrap_or(text)
            }
            None => "no diagnostic reported".to_string(),
        };
        BridgeError::new(kind, message)
    }
}

impl Default for HlirError {
    fn default() -> Self {
        HlirError::new()
    }
}

/// Opaque source-module handle (`HLIR_Module*` on the C side).
#[repr(C)]
pub struct HlirModuleRef {
    _private: [u8; 0],
}

/// Opaque lowered-module handle (`DOC_Module*` on the C side).
#[repr(C)]
pub struct DocModuleRef {
    _private: [u8; 0],
}

/// Opaque lowering context (`HLIR_Context*` on the C side).
#[repr(C)]
pub struct HlirContextRef {
    _private: [u8; 0],
}

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
pub type InitFn = unsafe extern "C" fn();
pub type TeardownFn = unsafe extern "C" fn();
pub type LowerFn =
    unsafe extern "C" fn(module: *const HlirModuleRef, err: *mut HlirError) -> *mut DocModuleRef;
pub type DestroyDocFn = unsafe extern "C" fn(module: *mut DocModuleRef);
pub type SerializeFn = unsafe extern "C" fn(
    module: *const DocModuleRef,
    out_size: *mut usize,
    err: *mut HlirError,
) -> *mut c_uchar;
pub type FreeBufferFn = unsafe extern "C" fn(buffer: *mut std::ffi::c_void);
pub type ErrorResetFn = unsafe extern "C" fn(err: *mut HlirError);
pub type ContextCreateFn =
    unsafe extern "C" fn(config_json: *const c_char, err: *mut HlirError) -> *mut HlirContextRef;
pub type ContextDestroyFn = unsafe extern "C" fn(ctx: *mut HlirContextRef);
pub type ContextLowerFn = unsafe extern "C" fn(
    ctx: *const HlirContextRef,
    module: *const HlirModuleRef,
    err: *mut HlirError,
) -> *mut DocModuleRef;

/// Exported symbol names, NUL-terminated for `libloading`.
pub mod symbols {
    pub const ABI_VERSION: &[u8] = b"hlir_abi_version\0";
    pub const INIT: &[u8] = b"hlir_init\0";
    pub const TEARDOWN: &[u8] = b"hlir_destroy\0";
    pub const LOWER: &[u8] = b"hlir_lower_to_doc\0";
    pub const DESTROY_DOC: &[u8] = b"doc_module_destroy\0";
    pub const SERIALIZE: &[u8] = b"doc_module_serialize\0";
    pub const FREE_BUFFER: &[u8] = b"hlir_free_buffer\0";
    pub const ERROR_RESET: &[u8] = b"hlir_error_reset\0";
    pub const CONTEXT_CREATE: &[u8] = b"hlir_context_create\0";
    pub const CONTEXT_DESTROY: &[u8] = b"hlir_context_destroy\0";
    pub const CONTEXT_LOWER: &[u8] = b"hlir_context_lower_to_doc\0";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_reads_as_success() {
        let rec = HlirError::new();
        assert!(rec.is_ok());
        assert!(rec.message.is_null());
        assert_eq!(unsafe { rec.message_lossy() }, None);
    }

    #[test]
    fn record_layout_is_code_then_pointer() {
        assert_eq!(std::mem::offset_of!(HlirError, code), 0);
        assert_eq!(
            std::mem::offset_of!(HlirError, message),
            std::mem::align_of::<*mut c_char>().max(4)
        );
    }

    #[test]
    fn to_bridge_error_without_message() {
        let rec = HlirError {
            code: ErrorKind::NullInput.code(),
            message: ptr::null_mut(),
        };
        let err = unsafe { rec.to_bridge_error() };
        assert_eq!(err.kind(), ErrorKind::NullInput);
    }
}
