//! C ABI for HLIR to DOC lowering.
//!
//! Exports:
//! - `hlir_init` / `hlir_destroy`: counted process-wide setup and teardown
//! - `hlir_lower_to_doc(module, err) -> DOC_Module*`
//! - `doc_module_serialize(module, out_size, err) -> uint8_t*`
//! - `doc_module_destroy`, `hlir_free_buffer`, `hlir_error_reset`
//! - `hlir_context_*`: the same pipeline scoped to an explicit context
//! - `hlir_module_from_json` / `hlir_module_destroy` for hosts that cannot
//!   build an `HlirModule` themselves
//!
//! Every export runs inside `guard::guarded` or `guard::absorb`, so no
//! panic unwinds into the caller. Fallible exports return null exactly when
//! the error record carries a nonzero code.

mod buffer;
mod guard;

use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_uchar};
use std::ptr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use docbridge_core::abi::{DocModuleRef, HlirContextRef, HlirModuleRef};
use docbridge_core::{
    ABI_VERSION, BridgeApi, BridgeConfig, BridgeContext, BridgeError, BridgeResult, DocModule, ErrorKind,
    HlirError, HlirModule, Lifecycle,
};
use lazy_static::lazy_static;

lazy_static! {
    static ref LIFECYCLE: RwLock<Lifecycle> = RwLock::new(Lifecycle::new());
}

// A panic while the lock is held cannot leave `Lifecycle` half-updated, so a
// poisoned lock is still usable.
fn lifecycle_read() -> RwLockReadGuard<'static, Lifecycle> {
    LIFECYCLE.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lifecycle_write() -> RwLockWriteGuard<'static, Lifecycle> {
    LIFECYCLE.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

unsafe fn borrow_module<'a>(module: *const HlirModuleRef) -> BridgeResult<&'a HlirModule> {
    unsafe { module.cast::<HlirModule>().as_ref() }.ok_or_else(|| BridgeError::null_input("HLIR module"))
}

unsafe fn borrow_doc<'a>(module: *const DocModuleRef) -> BridgeResult<&'a DocModule> {
    unsafe { module.cast::<DocModule>().as_ref() }.ok_or_else(|| BridgeError::null_input("DOC module"))
}

unsafe fn borrow_context<'a>(ctx: *const HlirContextRef) -> BridgeResult<&'a BridgeContext> {
    unsafe { ctx.cast::<BridgeContext>().as_ref() }.ok_or_else(|| BridgeError::null_input("lowering context"))
}

unsafe fn read_c_str<'a>(raw: *const c_char, what: &str) -> BridgeResult<&'a str> {
    let text = unsafe { CStr::from_ptr(raw) };
    text.to_str()
        .map_err(|e| BridgeError::invalid_input(format!("{} is not valid UTF-8: {}", what, e)))
}

fn into_doc_handle(doc: DocModule) -> *mut DocModuleRef {
    Box::into_raw(Box::new(doc)).cast()
}

/// ABI revision of this build. Hosts compare it before calling anything else.
#[unsafe(no_mangle)]
pub extern "C" fn hlir_abi_version() -> u32 {
    ABI_VERSION
}

/// Register one user of the process-wide context. The first call builds it
/// from `HLIR_BRIDGE_CONFIG` (or defaults); every call must be paired with
/// one `hlir_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn hlir_init() {
    guard::absorb("hlir_init", || {
        let mut lc = lifecycle_write();
        lc.acquire(BridgeConfig::from_env);
        log::debug!("hlir_init: {} outstanding", lc.outstanding());
    });
}

/// Close one `hlir_init`. The shared context is released after the last
/// pair closes; a teardown without a matching init does nothing.
#[unsafe(no_mangle)]
pub extern "C" fn hlir_destroy() {
    guard::absorb("hlir_destroy", || {
        lifecycle_write().release();
    });
}

/// Lower `module` with the process-wide context.
///
/// A null module reports `NullInput`; a call outside an init/teardown pair
/// reports `NotInitialized`.
///
/// # Safety
/// `module` must be null or point at a live `HlirModule` (a Rust host's
/// `&HlirModule`, or a handle from `hlir_module_from_json`). `err` must be
/// null or point at a writable `HLIR_Error`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_lower_to_doc(module: *const HlirModuleRef, err: *mut HlirError) -> *mut DocModuleRef {
    unsafe {
        guard::guarded("hlir_lower_to_doc", err, ErrorKind::TransformationFailure, ptr::null_mut(), || {
            let module = unsafe { borrow_module(module) }?;
            let ctx = lifecycle_read().current()?;
            ctx.lower(module).map(into_doc_handle)
        })
    }
}

/// # Safety
/// `module` must be null or a handle from one of the lowering exports that
/// has not been destroyed yet. No other thread may use it concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn doc_module_destroy(module: *mut DocModuleRef) {
    if module.is_null() {
        return;
    }
    guard::absorb("doc_module_destroy", || {
        drop(unsafe { Box::from_raw(module.cast::<DocModule>()) });
    });
}

/// Copy the encoded module into a fresh caller-owned buffer, to be released
/// with `hlir_free_buffer`. Repeated calls return byte-identical buffers,
/// and concurrent calls on the same handle are allowed.
///
/// When `out_size` is null the buffer is still returned but its length is
/// lost to the caller.
///
/// # Safety
/// `module` must be null or a live handle from a lowering export.
/// `out_size` and `err` must each be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn doc_module_serialize(
    module: *const DocModuleRef,
    out_size: *mut usize,
    err: *mut HlirError,
) -> *mut c_uchar {
    if let Some(size) = unsafe { out_size.as_mut() } {
        *size = 0;
    }
    unsafe {
        guard::guarded("doc_module_serialize", err, ErrorKind::SerializationFailure, ptr::null_mut(), || {
            let doc = unsafe { borrow_doc(module) }?;
            let bytes = doc.serializable_bytes()?;
            let data = buffer::alloc_bytes(bytes)?;
            if let Some(size) = unsafe { out_size.as_mut() } {
                *size = bytes.len();
            }
            Ok(data)
        })
    }
}

/// Release a serialized buffer or an error message.
///
/// # Safety
/// `data` must be null or a pointer returned by this library through
/// `doc_module_serialize` or `HLIR_Error::message`, not yet released.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_free_buffer(data: *mut c_void) {
    unsafe { buffer::free_block(data.cast()) };
}

/// Free the record's message (if any) and reset it to success so it can be
/// reused for the next call.
///
/// # Safety
/// `err` must be null or point at a record whose message is null or still
/// owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_error_reset(err: *mut HlirError) {
    if let Some(rec) = unsafe { err.as_mut() } {
        unsafe { buffer::free_block(rec.message.cast()) };
        rec.message = ptr::null_mut();
        rec.code = ErrorKind::Success.code();
    }
}

/// Build an independent lowering context. `config_json` may be null for
/// defaults; otherwise it is a JSON object with any of `document_entry`,
/// `strip_names` and `max_output_bytes`.
///
/// # Safety
/// `config_json` must be null or a NUL-terminated string. `err` must be null
/// or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_context_create(config_json: *const c_char, err: *mut HlirError) -> *mut HlirContextRef {
    unsafe {
        guard::guarded("hlir_context_create", err, ErrorKind::TransformationFailure, ptr::null_mut(), || {
            let config = if config_json.is_null() {
                BridgeConfig::default()
            } else {
                BridgeConfig::from_json_str(unsafe { read_c_str(config_json, "config") }?)?
            };
            Ok(Box::into_raw(Box::new(BridgeContext::new(config))).cast())
        })
    }
}

/// # Safety
/// `ctx` must be null or a live handle from `hlir_context_create`, and no
/// lowering may be running on it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_context_destroy(ctx: *mut HlirContextRef) {
    if ctx.is_null() {
        return;
    }
    guard::absorb("hlir_context_destroy", || {
        drop(unsafe { Box::from_raw(ctx.cast::<BridgeContext>()) });
    });
}

/// Lower `module` with an explicit context. Needs no `hlir_init`.
///
/// # Safety
/// `ctx` must be null or a live context handle; `module` as for
/// `hlir_lower_to_doc`. `err` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_context_lower_to_doc(
    ctx: *const HlirContextRef,
    module: *const HlirModuleRef,
    err: *mut HlirError,
) -> *mut DocModuleRef {
    unsafe {
        guard::guarded("hlir_context_lower_to_doc", err, ErrorKind::TransformationFailure, ptr::null_mut(), || {
            let ctx = unsafe { borrow_context(ctx) }?;
            let module = unsafe { borrow_module(module) }?;
            ctx.lower(module).map(into_doc_handle)
        })
    }
}

/// Parse a JSON-encoded HLIR module into a handle usable with the lowering
/// exports. Release it with `hlir_module_destroy`.
///
/// # Safety
/// `json` must be null or a NUL-terminated string. `err` must be null or
/// writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_module_from_json(json: *const c_char, err: *mut HlirError) -> *mut HlirModuleRef {
    unsafe {
        guard::guarded("hlir_module_from_json", err, ErrorKind::InvalidInput, ptr::null_mut(), || {
            if json.is_null() {
                return Err(BridgeError::null_input("module JSON"));
            }
            let module = HlirModule::from_json_str(unsafe { read_c_str(json, "module JSON") }?)?;
            Ok(Box::into_raw(Box::new(module)).cast())
        })
    }
}

/// # Safety
/// `module` must be null or a live handle from `hlir_module_from_json`.
/// Pointers to host-owned `HlirModule` values must never be passed here.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hlir_module_destroy(module: *mut HlirModuleRef) {
    if module.is_null() {
        return;
    }
    guard::absorb("hlir_module_destroy", || {
        drop(unsafe { Box::from_raw(module.cast::<HlirModule>()) });
    });
}

/// Function table for hosts that link this crate statically instead of
/// loading the shared library.
pub fn linked_api() -> BridgeApi {
    BridgeApi {
        abi_version: hlir_abi_version,
        init: hlir_init,
        teardown: hlir_destroy,
        lower: hlir_lower_to_doc,
        destroy_doc: doc_module_destroy,
        serialize: doc_module_serialize,
        free_buffer: hlir_free_buffer,
        error_reset: hlir_error_reset,
        context_create: hlir_context_create,
        context_destroy: hlir_context_destroy,
        context_lower: hlir_context_lower_to_doc,
    }
}
