use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level_str = match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        };
        write!(f, "{}", level_str)
    }
}

/// Closed set of status codes written into an error record.
///
/// The discriminants are part of the ABI and must never be renumbered.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success = 0,
    /// A required handle was null.
    NullInput = 1,
    /// Lowering rejected the module or faulted internally.
    TransformationFailure = 2,
    /// Encoding the lowered module into a buffer failed.
    SerializationFailure = 3,
    /// A global-state operation ran outside an `hlir_init`/`hlir_destroy` pair.
    NotInitialized = 4,
    /// Caller-supplied text (JSON, config) could not be decoded.
    InvalidInput = 5,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw code back to a kind. Unknown codes are reported as
    /// transformation failures so a newer library never reads as success.
    pub fn from_code(code: i32) -> ErrorKind {
        match code {
            0 => ErrorKind::Success,
            1 => ErrorKind::NullInput,
            2 => ErrorKind::TransformationFailure,
            3 => ErrorKind::SerializationFailure,
            4 => ErrorKind::NotInitialized,
            5 => ErrorKind::InvalidInput,
            _ => ErrorKind::TransformationFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Success => "success",
            ErrorKind::NullInput => "null input",
            ErrorKind::TransformationFailure => "transformation failure",
            ErrorKind::SerializationFailure => "serialization failure",
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::InvalidInput => "invalid input",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait DocBridgeErrorExt {
    fn level(&self) -> Level;
    fn message(&self) -> String;
    fn issuer(&self) -> String;
}

impl fmt::Debug for dyn DocBridgeErrorExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DOCBRIDGE | {} | {} | {}", self.level(), self.issuer(), self.message())
    }
}

impl fmt::Display for dyn DocBridgeErrorExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error carried on the Rust side of the boundary. Every variant of
/// `ErrorKind` other than `Success` can appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
    issuer: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BridgeError {
            kind,
            message: message.into(),
            issuer: "docbridge".to_string(),
        }
    }

    pub fn with_issuer(kind: ErrorKind, message: impl Into<String>, issuer: impl Into<String>) -> Self {
        BridgeError {
            kind,
            message: message.into(),
            issuer: issuer.into(),
        }
    }

    pub fn null_input(what: &str) -> Self {
        BridgeError::new(ErrorKind::NullInput, format!("{} is null", what))
    }

    pub fn transformation(message: impl Into<String>) -> Self {
        BridgeError::with_issuer(ErrorKind::TransformationFailure, message, "docbridge.lower")
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        BridgeError::with_issuer(ErrorKind::SerializationFailure, message, "docbridge.codec")
    }

    pub fn not_initialized() -> Self {
        BridgeError::with_issuer(
            ErrorKind::NotInitialized,
            "bridge is not initialized; call hlir_init first",
            "docbridge.lifecycle",
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        BridgeError::new(ErrorKind::InvalidInput, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BridgeError {}

impl DocBridgeErrorExt for BridgeError {
    fn level(&self) -> Level {
        match self.kind {
            ErrorKind::Success => Level::Info,
            ErrorKind::NullInput | ErrorKind::InvalidInput | ErrorKind::NotInitialized => Level::Error,
            ErrorKind::TransformationFailure | ErrorKind::SerializationFailure => Level::Critical,
        }
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        self.issuer.clone()
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
