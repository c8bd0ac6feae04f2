//! Length-headed heap blocks handed across the boundary.
//!
//! Every block is laid out as `[usize total][data ...]` and the caller only
//! ever sees the data pointer. The header lets `hlir_free_buffer` rebuild
//! the allocation layout from the pointer alone, so serialized buffers and
//! error messages share one release function.

use std::alloc::{Layout, alloc, dealloc};
use std::os::raw::c_char;
use std::ptr;

use docbridge_core::{BridgeError, BridgeResult};

const HEADER: usize = std::mem::size_of::<usize>();

fn layout_for(data_len: usize) -> Option<Layout> {
    let total = HEADER.checked_add(data_len)?;
    Layout::from_size_align(total, std::mem::align_of::<usize>()).ok()
}

/// Copy `bytes` into a fresh block, optionally appending a NUL.
fn alloc_block(bytes: &[u8], nul_terminate: bool) -> BridgeResult<*mut u8> {
    let data_len = bytes
        .len()
        .checked_add(nul_terminate as usize)
        .ok_or_else(|| BridgeError::serialization("buffer length overflows usize"))?;
    let layout = layout_for(data_len)
        .ok_or_else(|| BridgeError::serialization(format!("no valid layout for {} bytes", data_len)))?;

    let base = unsafe { alloc(layout) };
    if base.is_null() {
        return Err(BridgeError::serialization(format!("allocation of {} bytes failed", layout.size())));
    }
    unsafe {
        base.cast::<usize>().write(data_len);
        let data = base.add(HEADER);
        ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
        if nul_terminate {
            data.add(bytes.len()).write(0);
        }
        Ok(data)
    }
}

/// Allocate a caller-owned copy of `bytes`.
pub fn alloc_bytes(bytes: &[u8]) -> BridgeResult<*mut u8> {
    alloc_block(bytes, false)
}

/// Allocate a caller-owned NUL-terminated copy of `message`. Interior NULs
/// are replaced so the C string is never cut short. Returns null when the
/// allocation itself fails; the diagnostic is then lost, never the call.
pub fn alloc_message(message: &str) -> *mut c_char {
    let cleaned: Vec<u8> = message.bytes().map(|b| if b == 0 { b' ' } else { b }).collect();
    match alloc_block(&cleaned, true) {
        Ok(p) => p.cast(),
        Err(_) => ptr::null_mut(),
    }
}

/// Release a block produced by this module. Null is a no-op.
///
/// # Safety
/// `data` must be null or a pointer returned by `alloc_bytes` /
/// `alloc_message` that has not been freed yet.
pub unsafe fn free_block(data: *mut u8) {
    if data.is_null() {
        return;
    }
    unsafe {
        let base = data.sub(HEADER);
        let data_len = base.cast::<usize>().read();
        if let Some(layout) = layout_for(data_len) {
            dealloc(base, layout);
        }
    }
}
