//! file: core/src/host.rs
//! description: host-side adapter for the lowering library.
//!
//! Resolves the exported C symbols (dynamically through `libloading`, or
//! from a statically linked table) and wraps every pointer the library hands
//! back in a move-only owner whose `Drop` calls the paired release function
//! exactly once. Owners borrow the `Bridge`, so a loaded library cannot be
//! unloaded while any of its handles or buffers are alive.

use std::ffi::CString;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::abi::{self, DocModuleRef, HlirContextRef, HlirError, HlirModuleRef, symbols};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::hlir::HlirModule;

/// Function table for one copy of the library.
#[derive(Clone, Copy)]
pub struct BridgeApi {
    pub abi_version: abi::AbiVersionFn,
    pub init: abi::InitFn,
    pub teardown: abi::TeardownFn,
    pub lower: abi::LowerFn,
    pub destroy_doc: abi::DestroyDocFn,
    pub serialize: abi::SerializeFn,
    pub free_buffer: abi::FreeBufferFn,
    pub error_reset: abi::ErrorResetFn,
    pub context_create: abi::ContextCreateFn,
    pub context_destroy: abi::ContextDestroyFn,
    pub context_lower: abi::ContextLowerFn,
}

pub struct Bridge {
    api: BridgeApi,
    _lib: Option<Arc<Library>>,
    origin: Option<PathBuf>,
}

impl Bridge {
    /// Use a table whose functions are linked into this binary.
    pub fn linked(api: BridgeApi) -> BridgeResult<Self> {
        let bridge = Bridge { api, _lib: None, origin: None };
        bridge.check_version()?;
        Ok(bridge)
    }

    /// Load the library at `path` and resolve every exported symbol.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        if !path.is_file() {
            return Err(host_error(format!("library path is not a file: {}", path.display())));
        }

        let lib = unsafe { Library::new(path) }.map_err(|e| {
            host_error(format!(
                "failed to load library {}: {}. Hint: verify the file is a shared library for this OS/architecture.",
                path.display(),
                e
            ))
        })?;

        let api = unsafe {
            BridgeApi {
                abi_version: resolve(&lib, path, symbols::ABI_VERSION)?,
                init: resolve(&lib, path, symbols::INIT)?,
                teardown: resolve(&lib, path, symbols::TEARDOWN)?,
                lower: resolve(&lib, path, symbols::LOWER)?,
                destroy_doc: resolve(&lib, path, symbols::DESTROY_DOC)?,
                serialize: resolve(&lib, path, symbols::SERIALIZE)?,
                free_buffer: resolve(&lib, path, symbols::FREE_BUFFER)?,
                error_reset: resolve(&lib, path, symbols::ERROR_RESET)?,
                context_create: resolve(&lib, path, symbols::CONTEXT_CREATE)?,
                context_destroy: resolve(&lib, path, symbols::CONTEXT_DESTROY)?,
                context_lower: resolve(&lib, path, symbols::CONTEXT_LOWER)?,
            }
        };

        let bridge = Bridge {
            api,
            _lib: Some(Arc::new(lib)),
            origin: Some(path.to_path_buf()),
        };
        bridge.check_version()?;
        log::info!("loaded lowering library from {}", path.display());
        Ok(bridge)
    }

    fn check_version(&self) -> BridgeResult<()> {
        let found = unsafe { (self.api.abi_version)() };
        if found != abi::ABI_VERSION {
            return Err(host_error(format!(
                "library ABI version {} does not match host version {}",
                found,
                abi::ABI_VERSION
            )));
        }
        Ok(())
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Create a context-scoped session. No global init is needed.
    pub fn open_session(&self, config: &BridgeConfig) -> BridgeResult<Session<'_>> {
        let json = CString::new(config.to_json()).map_err(|e| host_error(format!("config json: {}", e)))?;
        let mut err = HlirError::new();
        let raw = unsafe { (self.api.context_create)(json.as_ptr(), &mut err) };
        match NonNull::new(raw) {
            Some(ctx) => Ok(Session { bridge: self, ctx }),
            None => Err(self.take_error(&mut err)),
        }
    }

    /// Run `hlir_init`; the returned guard runs `hlir_destroy` when dropped.
    pub fn global(&self) -> GlobalGuard<'_> {
        unsafe { (self.api.init)() };
        GlobalGuard { bridge: self }
    }

    /// One-shot: init, lower, serialize, release, teardown.
    pub fn lower_to_doc(&self, module: &HlirModule) -> BridgeResult<Vec<u8>> {
        self.global().lower_to_doc(module)
    }

    /// Copy the diagnostic out of `err` and release its message buffer.
    fn take_error(&self, err: &mut HlirError) -> BridgeError {
        let out = if err.is_ok() {
            BridgeError::with_issuer(
                ErrorKind::TransformationFailure,
                "library returned null without reporting an error",
                "docbridge.host",
            )
        } else {
            unsafe { err.to_bridge_error() }
        };
        unsafe { (self.api.error_reset)(err) };
        out
    }

    fn wrap_doc(&self, raw: *mut DocModuleRef, err: &mut HlirError) -> BridgeResult<DocHandle<'_>> {
        match NonNull::new(raw) {
            Some(ptr) => Ok(DocHandle { bridge: self, ptr }),
            None => Err(self.take_error(err)),
        }
    }
}

unsafe fn resolve<T: Copy>(lib: &Library, path: &Path, name: &[u8]) -> BridgeResult<T> {
    let sym: Symbol<T> = unsafe { lib.get(name) }.map_err(|e| {
        let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]).into_owned();
        host_error(format!(
            "missing symbol '{}' in {}: {}. Ensure the library exports it with `extern \"C\"` and `#[no_mangle]`.",
            printable,
            path.display(),
            e
        ))
    })?;
    Ok(*sym)
}

fn host_error(message: String) -> BridgeError {
    BridgeError::with_issuer(ErrorKind::InvalidInput, message, "docbridge.host")
}

fn module_ptr(module: &HlirModule) -> *const HlirModuleRef {
    module as *const HlirModule as *const HlirModuleRef
}

/// An owned lowering context (`hlir_context_create` / `hlir_context_destroy`).
pub struct Session<'b> {
    bridge: &'b Bridge,
    ctx: NonNull<HlirContextRef>,
}

impl<'b> Session<'b> {
    pub fn lower(&self, module: &HlirModule) -> BridgeResult<DocHandle<'b>> {
        let mut err = HlirError::new();
        let raw = unsafe { (self.bridge.api.context_lower)(self.ctx.as_ptr(), module_ptr(module), &mut err) };
        self.bridge.wrap_doc(raw, &mut err)
    }

    /// Lower and serialize in one step, releasing everything before returning.
    pub fn lower_to_doc(&self, module: &HlirModule) -> BridgeResult<Vec<u8>> {
        self.lower(module)?.to_bytes()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        unsafe { (self.bridge.api.context_destroy)(self.ctx.as_ptr()) };
    }
}

/// Holds one `hlir_init`; dropping it performs the paired `hlir_destroy`.
pub struct GlobalGuard<'b> {
    bridge: &'b Bridge,
}

impl<'b> GlobalGuard<'b> {
    pub fn lower(&self, module: &HlirModule) -> BridgeResult<DocHandle<'b>> {
        let mut err = HlirError::new();
        let raw = unsafe { (self.bridge.api.lower)(module_ptr(module), &mut err) };
        self.bridge.wrap_doc(raw, &mut err)
    }

    pub fn lower_to_doc(&self, module: &HlirModule) -> BridgeResult<Vec<u8>> {
        self.lower(module)?.to_bytes()
    }
}

impl Drop for GlobalGuard<'_> {
    fn drop(&mut self) {
        unsafe { (self.bridge.api.teardown)() };
    }
}

/// An owned target module. Destroyed exactly once, on drop.
pub struct DocHandle<'b> {
    bridge: &'b Bridge,
    ptr: NonNull<DocModuleRef>,
}

impl<'b> DocHandle<'b> {
    pub fn serialize(&self) -> BridgeResult<OwnedBuffer<'b>> {
        let mut err = HlirError::new();
        let mut len: usize = 0;
        let raw = unsafe { (self.bridge.api.serialize)(self.ptr.as_ptr(), &mut len, &mut err) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(OwnedBuffer { bridge: self.bridge, ptr, len }),
            None => Err(self.bridge.take_error(&mut err)),
        }
    }

    pub fn to_bytes(&self) -> BridgeResult<Vec<u8>> {
        Ok(self.serialize()?.to_vec())
    }

    pub fn as_ptr(&self) -> *const DocModuleRef {
        self.ptr.as_ptr()
    }
}

impl std::fmt::Debug for DocHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DocHandle").field(&self.ptr).finish()
    }
}

impl Drop for DocHandle<'_> {
    fn drop(&mut self) {
        unsafe { (self.bridge.api.destroy_doc)(self.ptr.as_ptr()) };
    }
}

/// A library-allocated byte buffer, released with `hlir_free_buffer` on drop.
pub struct OwnedBuffer<'b> {
    bridge: &'b Bridge,
    ptr: NonNull<u8>,
    len: usize,
}

impl Deref for OwnedBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for OwnedBuffer<'_> {
    fn drop(&mut self) {
        unsafe { (self.bridge.api.free_buffer)(self.ptr.as_ptr().cast()) };
    }
}

impl std::fmt::Debug for OwnedBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedBuffer").field("len", &self.len).finish()
    }
}
