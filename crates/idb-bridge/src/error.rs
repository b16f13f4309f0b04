//! Error types for the IndexedDB bridge

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by the native engine, shaped like a `DOMException`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct NativeError {
    /// Exception name, e.g. `ReadOnlyError` or `ConstraintError`.
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl NativeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_abort(&self) -> bool {
        self.name == "AbortError"
    }
}

/// Errors that can occur while talking to the engine through the bridge
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The storage engine is not available in this environment
    #[error("IndexedDB is not supported on this device: {0}")]
    NotAvailable(String),

    /// Opening (or upgrading) a database failed
    #[error("unable to open database {name} {}: {source}", version_label(.version))]
    Open {
        name: String,
        version: Option<u32>,
        source: Box<Error>,
    },

    /// Deleting a database failed
    #[error("unable to delete database {name}: {source}")]
    Delete { name: String, source: Box<Error> },

    /// Transaction mode outside of `readonly` / `readwrite`
    #[error("unsupported transaction mode \"{0}\"")]
    InvalidMode(String),

    /// A store shortcut was given a list of stores
    #[error("store must be a single name when directly using a store, got {0:?}")]
    StoreNameRequired(Vec<String>),

    /// Native error on a request, a transaction or a synchronous engine call
    #[error("{0}")]
    Native(NativeError),

    /// The transaction was aborted, explicitly or after a failure
    #[error("transaction aborted{}", abort_reason(.0))]
    Aborted(Option<NativeError>),

    /// The native side dropped its listeners without firing
    #[error("request was dropped before the engine answered")]
    Canceled,

    /// Schema configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// JavaScript value conversion error
    #[error("JS conversion error: {0}")]
    JsValue(String),
}

impl Error {
    /// The underlying native error, if this error came from the engine.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::Native(err) => Some(err),
            Error::Aborted(reason) => reason.as_ref(),
            Error::Open { source, .. } | Error::Delete { source, .. } => source.native(),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        match self {
            Error::Aborted(_) => true,
            Error::Open { source, .. } | Error::Delete { source, .. } => source.is_aborted(),
            _ => false,
        }
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        if err.is_abort() {
            Error::Aborted(Some(err))
        } else {
            Error::Native(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(target_arch = "wasm32")]
impl From<wasm_bindgen::JsValue> for Error {
    fn from(val: wasm_bindgen::JsValue) -> Self {
        let msg = js_sys::JSON::stringify(&val)
            .map(String::from)
            .unwrap_or_else(|_| format!("{:?}", val));
        Error::JsValue(msg)
    }
}

fn version_label(version: &Option<u32>) -> String {
    match version {
        Some(v) => format!("v{}", v),
        None => "(default version)".to_string(),
    }
}

fn abort_reason(reason: &Option<NativeError>) -> String {
    match reason {
        Some(err) => format!(": {}", err),
        None => String::new(),
    }
}
