//! file: core/src/context.rs
//! description: lowering contexts and the process-wide lifecycle registry.
//!
//! A `BridgeContext` is built once from a `BridgeConfig` and never mutated
//! afterwards; it is shared as `Arc` between threads. `Lifecycle` models
//! the `hlir_init` / `hlir_destroy` pair: init calls are counted, and the
//! shared context lives until the matching number of teardowns.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::doc::{DocModule, lower::lower_hlir_to_doc};
use crate::error::{BridgeError, BridgeResult};
use crate::hlir::HlirModule;

#[derive(Debug)]
pub struct BridgeContext {
    id: Uuid,
    config: BridgeConfig,
}

impl BridgeContext {
    pub fn new(config: BridgeConfig) -> Self {
        let id = Uuid::new_v4();
        log::info!("lowering context {} created (entry '{}')", id, config.document_entry);
        BridgeContext { id, config }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run the lowering pipeline and freeze the result into a target module.
    pub fn lower(&self, module: &HlirModule) -> BridgeResult<DocModule> {
        let program = lower_hlir_to_doc(module, &self.config)?;
        let doc = DocModule::from_program(&program, self.config.max_output_bytes);
        log::debug!(
            "context {}: module '{}' lowered to {} payload bytes",
            self.id,
            module.name,
            doc.payload().len()
        );
        Ok(doc)
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        log::info!("lowering context {} released", self.id);
    }
}

/// Reference-counted init/teardown state.
#[derive(Debug, Default)]
pub struct Lifecycle {
    refs: usize,
    context: Option<Arc<BridgeContext>>,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Lifecycle { refs: 0, context: None }
    }

    /// Register one init. The first call builds the shared context with the
    /// config produced by `make_config`; later calls reuse it.
    pub fn acquire<F>(&mut self, make_config: F) -> Arc<BridgeContext>
    where
        F: FnOnce() -> BridgeConfig,
    {
        self.refs += 1;
        match &self.context {
            Some(ctx) => {
                log::debug!("init #{} reuses context {}", self.refs, ctx.id());
                Arc::clone(ctx)
            }
            None => {
                let ctx = Arc::new(BridgeContext::new(make_config()));
                self.context = Some(Arc::clone(&ctx));
                ctx
            }
        }
    }

    /// Register one teardown. Returns false (and changes nothing) when no
    /// init is outstanding.
    pub fn release(&mut self) -> bool {
        if self.refs == 0 {
            log::warn!("teardown without a matching init ignored");
            return false;
        }
        self.refs -= 1;
        if self.refs == 0 {
            self.context = None;
        }
        true
    }

    /// The shared context, or `NotInitialized` outside an init/teardown pair.
    pub fn current(&self) -> BridgeResult<Arc<BridgeContext>> {
        self.context.clone().ok_or_else(BridgeError::not_initialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.refs
    }
}
