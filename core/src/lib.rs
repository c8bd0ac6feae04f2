pub mod abi;
pub mod config;
pub mod context;
pub mod doc;
pub mod error;
pub mod hlir;
pub mod host;

pub use abi::{ABI_VERSION, HlirError};
pub use config::BridgeConfig;
pub use context::{BridgeContext, Lifecycle};
pub use doc::{DocModule, DocProgram, lower::lower_hlir_to_doc};
pub use error::{BridgeError, BridgeResult, DocBridgeErrorExt, ErrorKind, Level};
pub use hlir::HlirModule;
pub use host::{Bridge, BridgeApi};

pub fn generate_error_report<E: DocBridgeErrorExt>(error: &E) -> String {
    format!("DOCBRIDGE | {} | {} | {}", error.level(), error.issuer(), error.message())
}

/// Lower and encode in-process, without crossing the C boundary.
pub fn lower_to_payload(module: &HlirModule, config: &BridgeConfig) -> BridgeResult<Vec<u8>> {
    let program = lower_hlir_to_doc(module, config)?;
    Ok(doc::codec::encode(&program))
}
