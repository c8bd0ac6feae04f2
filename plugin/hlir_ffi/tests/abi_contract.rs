use std::ffi::{CStr, CString};
use std::ptr;
use std::thread;

use docbridge_core::abi::{DocModuleRef, HlirContextRef, HlirModuleRef};
use docbridge_core::hlir::{Literal, Op, Type, ValueId};
use docbridge_core::{ErrorKind, HlirError, HlirModule};
use hlir_ffi::*;

const EMPTY_DOC: [u8; 28] = [
    b'D', b'O', b'C', b'M', 1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

fn as_ref(module: &HlirModule) -> *const HlirModuleRef {
    module as *const HlirModule as *const HlirModuleRef
}

fn message(err: &HlirError) -> String {
    assert!(!err.message.is_null(), "failure must carry a message");
    unsafe { CStr::from_ptr(err.message) }.to_string_lossy().into_owned()
}

fn new_context(config: Option<&str>) -> *mut HlirContextRef {
    let json = config.map(|c| CString::new(c).expect("config has no NUL"));
    let mut err = HlirError::new();
    let ctx = unsafe { hlir_context_create(json.as_ref().map_or(ptr::null(), |c| c.as_ptr()), &mut err) };
    assert!(!ctx.is_null(), "context create failed: code {}", err.code);
    assert!(err.is_ok());
    ctx
}

fn lower(ctx: *mut HlirContextRef, module: &HlirModule) -> *mut DocModuleRef {
    let mut err = HlirError::new();
    let doc = unsafe { hlir_context_lower_to_doc(ctx, as_ref(module), &mut err) };
    assert!(err.is_ok(), "lowering failed: {}", message(&err));
    assert!(!doc.is_null());
    doc
}

fn serialize(doc: *const DocModuleRef) -> Vec<u8> {
    let mut err = HlirError::new();
    let mut len = usize::MAX;
    let buf = unsafe { doc_module_serialize(doc, &mut len, &mut err) };
    assert!(err.is_ok());
    assert!(!buf.is_null());
    let bytes = unsafe { std::slice::from_raw_parts(buf, len) }.to_vec();
    unsafe { hlir_free_buffer(buf.cast()) };
    bytes
}

fn small_module() -> HlirModule {
    let mut module = HlirModule::new("small");
    module.add_global("answer", Literal::Int(42));
    module.add_function(
        "read_answer",
        Vec::new(),
        Some(Type::Int),
        vec![
            Op::Var { result: ValueId(0), name: "answer".into() },
            Op::Return { value: Some(ValueId(0)) },
        ],
    );
    module
}

#[test]
fn empty_module_serializes_to_fixed_header() {
    let ctx = new_context(None);
    let doc = lower(ctx, &HlirModule::new("empty"));
    let bytes = serialize(doc);
    assert_eq!(bytes.len(), 28);
    assert_eq!(bytes, EMPTY_DOC);
    unsafe {
        doc_module_destroy(doc);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn repeated_serialize_is_byte_identical() {
    let ctx = new_context(None);
    let doc = lower(ctx, &small_module());
    let first = serialize(doc);
    let second = serialize(doc);
    assert_eq!(first, second);
    assert_eq!(&first[..4], b"DOCM");
    unsafe {
        doc_module_destroy(doc);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn lowering_is_deterministic_across_contexts() {
    let a = new_context(None);
    let b = new_context(None);
    let da = lower(a, &small_module());
    let db = lower(b, &small_module());
    assert_eq!(serialize(da), serialize(db));
    unsafe {
        doc_module_destroy(da);
        doc_module_destroy(db);
        hlir_context_destroy(a);
        hlir_context_destroy(b);
    }
}

#[test]
fn null_inputs_report_null_input() {
    let ctx = new_context(None);

    let mut err = HlirError::new();
    let doc = unsafe { hlir_context_lower_to_doc(ctx, ptr::null(), &mut err) };
    assert!(doc.is_null());
    assert_eq!(err.kind(), ErrorKind::NullInput);
    unsafe { hlir_error_reset(&mut err) };
    assert!(err.is_ok());
    assert!(err.message.is_null());

    let module = small_module();
    let doc = unsafe { hlir_context_lower_to_doc(ptr::null(), as_ref(&module), &mut err) };
    assert!(doc.is_null());
    assert_eq!(err.kind(), ErrorKind::NullInput);
    unsafe { hlir_error_reset(&mut err) };

    // Null module is checked before the lifecycle state.
    let doc = unsafe { hlir_lower_to_doc(ptr::null(), &mut err) };
    assert!(doc.is_null());
    assert_eq!(err.kind(), ErrorKind::NullInput);
    unsafe { hlir_error_reset(&mut err) };

    let mut len = 99usize;
    let buf = unsafe { doc_module_serialize(ptr::null(), &mut len, &mut err) };
    assert!(buf.is_null());
    assert_eq!(len, 0);
    assert_eq!(err.kind(), ErrorKind::NullInput);
    assert!(message(&err).contains("DOC module"));
    unsafe {
        hlir_error_reset(&mut err);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn releases_accept_null() {
    unsafe {
        doc_module_destroy(ptr::null_mut());
        hlir_free_buffer(ptr::null_mut());
        hlir_context_destroy(ptr::null_mut());
        hlir_module_destroy(ptr::null_mut());
        hlir_error_reset(ptr::null_mut());
    }
}

#[test]
fn null_error_record_still_returns_result() {
    let ctx = new_context(None);
    let module = small_module();
    let doc = unsafe { hlir_context_lower_to_doc(ctx, as_ref(&module), ptr::null_mut()) };
    assert!(!doc.is_null());
    let failed = unsafe { hlir_context_lower_to_doc(ctx, ptr::null(), ptr::null_mut()) };
    assert!(failed.is_null());
    unsafe {
        doc_module_destroy(doc);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn null_out_size_still_returns_buffer() {
    let ctx = new_context(None);
    let doc = lower(ctx, &HlirModule::new("empty"));
    let mut err = HlirError::new();
    let buf = unsafe { doc_module_serialize(doc, ptr::null_mut(), &mut err) };
    assert!(!buf.is_null());
    assert!(err.is_ok());
    let head = unsafe { std::slice::from_raw_parts(buf, 4) };
    assert_eq!(head, b"DOCM");
    unsafe {
        hlir_free_buffer(buf.cast());
        doc_module_destroy(doc);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn transformation_failure_names_the_problem() {
    let ctx = new_context(None);
    let mut module = HlirModule::new("broken");
    module.add_function("f", Vec::new(), None, vec![Op::Var { result: ValueId(0), name: "missing".into() }]);
    let mut err = HlirError::new();
    let doc = unsafe { hlir_context_lower_to_doc(ctx, as_ref(&module), &mut err) };
    assert!(doc.is_null());
    assert_eq!(err.kind(), ErrorKind::TransformationFailure);
    assert!(message(&err).contains("missing"));
    // Messages come from the same allocator as serialized buffers.
    unsafe {
        hlir_free_buffer(err.message.cast());
        hlir_context_destroy(ctx);
    }
}

#[test]
fn output_limit_fails_serialization_not_lowering() {
    let ctx = new_context(Some(r#"{"max_output_bytes": 16}"#));
    let doc = lower(ctx, &HlirModule::new("empty"));
    let mut err = HlirError::new();
    let mut len = 0usize;
    let buf = unsafe { doc_module_serialize(doc, &mut len, &mut err) };
    assert!(buf.is_null());
    assert_eq!(len, 0);
    assert_eq!(err.kind(), ErrorKind::SerializationFailure);
    assert!(message(&err).contains("limit is 16"));
    unsafe {
        hlir_error_reset(&mut err);
        doc_module_destroy(doc);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn bad_context_config_is_invalid_input() {
    let json = CString::new("{not json").expect("cstring");
    let mut err = HlirError::new();
    let ctx = unsafe { hlir_context_create(json.as_ptr(), &mut err) };
    assert!(ctx.is_null());
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    unsafe { hlir_error_reset(&mut err) };
}

#[test]
fn module_from_json_lowers_like_a_native_module() {
    let native = small_module();
    let json = CString::new(serde_json::to_string(&native).expect("encode")).expect("cstring");
    let mut err = HlirError::new();
    let parsed = unsafe { hlir_module_from_json(json.as_ptr(), &mut err) };
    assert!(!parsed.is_null());
    assert!(err.is_ok());

    let ctx = new_context(None);
    let from_json = unsafe { hlir_context_lower_to_doc(ctx, parsed, &mut err) };
    assert!(err.is_ok());
    let from_native = lower(ctx, &native);
    assert_eq!(serialize(from_json), serialize(from_native));
    unsafe {
        doc_module_destroy(from_json);
        doc_module_destroy(from_native);
        hlir_module_destroy(parsed);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn module_from_json_rejects_bad_input() {
    let mut err = HlirError::new();
    let none = unsafe { hlir_module_from_json(ptr::null(), &mut err) };
    assert!(none.is_null());
    assert_eq!(err.kind(), ErrorKind::NullInput);
    unsafe { hlir_error_reset(&mut err) };

    let json = CString::new(r#"{"functions": 3}"#).expect("cstring");
    let bad = unsafe { hlir_module_from_json(json.as_ptr(), &mut err) };
    assert!(bad.is_null());
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(message(&err).contains("parse hlir module"));
    unsafe { hlir_error_reset(&mut err) };
}

struct SharedDoc(*const DocModuleRef);
unsafe impl Send for SharedDoc {}
unsafe impl Sync for SharedDoc {}

impl SharedDoc {
    fn get(&self) -> *const DocModuleRef {
        self.0
    }
}

#[test]
fn concurrent_serialize_of_one_handle() {
    let ctx = new_context(None);
    let doc = lower(ctx, &small_module());
    let expected = serialize(doc);
    let shared = SharedDoc(doc);

    thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = &shared;
                s.spawn(move || serialize(shared.get()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("serializer thread"), expected);
        }
    });

    unsafe {
        doc_module_destroy(doc);
        hlir_context_destroy(ctx);
    }
}

#[test]
fn abi_version_matches_core() {
    assert_eq!(hlir_abi_version(), docbridge_core::ABI_VERSION);
}
