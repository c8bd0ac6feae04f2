// Counts bytes allocated and freed on the test thread only, so the harness
// and other threads do not disturb the balance.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ffi::CString;

use docbridge_core::abi::{DocModuleRef, HlirContextRef, HlirModuleRef};
use docbridge_core::config::CONFIG_ENV_VAR;
use docbridge_core::hlir::{DocElement, Literal, Op, Type, ValueId};
use docbridge_core::{ErrorKind, HlirError, HlirModule};
use hlir_ffi::*;

struct CountingAlloc;

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

fn track(delta: isize) {
    let _ = LIVE.try_with(|live| live.set(live.get() + delta));
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { System.alloc(layout) };
        if !p.is_null() {
            track(layout.size() as isize);
        }
        p
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        track(-(layout.size() as isize));
        unsafe { System.dealloc(ptr, layout) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let p = unsafe { System.realloc(ptr, layout, new_size) };
        if !p.is_null() {
            track(new_size as isize - layout.size() as isize);
        }
        p
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn live_bytes() -> isize {
    LIVE.with(|live| live.get())
}

fn sample() -> HlirModule {
    let mut module = HlirModule::new("leak");
    module.add_global("title", Literal::String("Report".into()));
    let idx = module.add_element(DocElement::Heading {
        level: 1,
        content: "Report".into(),
        attributes: Default::default(),
    });
    module.add_function(
        "__document",
        Vec::new(),
        None,
        vec![
            Op::Var { result: ValueId(0), name: "title".into() },
            Op::EmitElement { index: idx },
            Op::Return { value: None },
        ],
    );
    module.add_function("unit", Vec::new(), Some(Type::Int), vec![]);
    module
}

fn module_ref(module: &HlirModule) -> *const HlirModuleRef {
    module as *const HlirModule as *const HlirModuleRef
}

fn serialize_and_release(doc: *mut DocModuleRef, err: &mut HlirError) {
    assert!(!doc.is_null());
    let mut len = 0usize;
    let buf = unsafe { doc_module_serialize(doc, &mut len, err) };
    assert!(!buf.is_null());
    assert!(len > 28);
    unsafe {
        hlir_free_buffer(buf.cast());
        doc_module_destroy(doc);
    }
}

fn cycle(module: &HlirModule, ctx: *const HlirContextRef, limited: *const HlirContextRef) {
    let mut err = HlirError::new();
    let doc: *mut DocModuleRef = unsafe { hlir_context_lower_to_doc(ctx, module_ref(module), &mut err) };
    serialize_and_release(doc, &mut err);

    // Global path: the shared context is built on init and dropped on teardown.
    hlir_init();
    let doc = unsafe { hlir_lower_to_doc(module_ref(module), &mut err) };
    serialize_and_release(doc, &mut err);
    hlir_destroy();
    assert!(err.is_ok());

    // Failure paths: the message is the only allocation handed out.
    let failed = unsafe { hlir_context_lower_to_doc(ctx, std::ptr::null(), &mut err) };
    assert!(failed.is_null());
    assert_eq!(err.kind(), ErrorKind::NullInput);
    unsafe { hlir_error_reset(&mut err) };

    let doc = unsafe { hlir_context_lower_to_doc(limited, module_ref(module), &mut err) };
    assert!(!doc.is_null());
    let mut len = 0usize;
    let buf = unsafe { doc_module_serialize(doc, &mut len, &mut err) };
    assert!(buf.is_null());
    assert_eq!(err.kind(), ErrorKind::SerializationFailure);
    unsafe {
        hlir_error_reset(&mut err);
        doc_module_destroy(doc);
    }
}

#[test]
fn full_cycle_leaves_no_live_bytes() {
    unsafe { std::env::remove_var(CONFIG_ENV_VAR) };
    let module = sample();
    let mut err = HlirError::new();
    let ctx = unsafe { hlir_context_create(std::ptr::null(), &mut err) };
    assert!(!ctx.is_null());
    let limit = CString::new(r#"{"max_output_bytes": 16}"#).expect("cstring");
    let limited = unsafe { hlir_context_create(limit.as_ptr(), &mut err) };
    assert!(!limited.is_null());

    // Warm up one-time allocations (log, thread-locals, the lifecycle lock)
    // outside the window.
    cycle(&module, ctx, limited);

    let before = live_bytes();
    for _ in 0..16 {
        cycle(&module, ctx, limited);
    }
    let after = live_bytes();
    assert_eq!(after - before, 0, "lower/serialize/free/destroy leaked {} bytes", after - before);

    unsafe {
        hlir_context_destroy(limited);
        hlir_context_destroy(ctx);
    }
}
