// The process-wide lifecycle is shared by every test in a binary, so the
// whole sequence lives in one test function.

use std::ffi::CStr;
use std::ptr;

use docbridge_core::abi::HlirModuleRef;
use docbridge_core::{ErrorKind, HlirError, HlirModule};
use hlir_ffi::*;

fn lower_global(module: &HlirModule) -> (bool, HlirError) {
    let mut err = HlirError::new();
    let doc = unsafe { hlir_lower_to_doc(module as *const HlirModule as *const HlirModuleRef, &mut err) };
    let ok = !doc.is_null();
    unsafe { doc_module_destroy(doc) };
    (ok, err)
}

#[test]
fn init_and_teardown_gate_global_lowering() {
    let module = HlirModule::new("global");

    let (ok, mut err) = lower_global(&module);
    assert!(!ok);
    assert_eq!(err.kind(), ErrorKind::NotInitialized);
    let text = unsafe { CStr::from_ptr(err.message) }.to_string_lossy().into_owned();
    assert!(text.contains("hlir_init"), "unexpected message: {}", text);
    unsafe { hlir_error_reset(&mut err) };

    hlir_init();
    let (ok, err) = lower_global(&module);
    assert!(ok);
    assert!(err.is_ok());

    let mut err = HlirError::new();
    let doc = unsafe { hlir_lower_to_doc(ptr::null(), &mut err) };
    assert!(doc.is_null());
    assert_eq!(err.kind(), ErrorKind::NullInput);
    unsafe { hlir_error_reset(&mut err) };

    // Nested init: one teardown leaves the context alive.
    hlir_init();
    hlir_destroy();
    let (ok, _) = lower_global(&module);
    assert!(ok);

    hlir_destroy();
    let (ok, mut err) = lower_global(&module);
    assert!(!ok);
    assert_eq!(err.kind(), ErrorKind::NotInitialized);
    unsafe { hlir_error_reset(&mut err) };

    // Surplus teardown is ignored, and init works again afterwards.
    hlir_destroy();
    hlir_init();
    let (ok, _) = lower_global(&module);
    assert!(ok);
    hlir_destroy();
}
