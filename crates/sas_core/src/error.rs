//! Error reporting
//!
//! Core operations never return errors across their public boundary. They
//! return a `bool`, an `Option` or an [`InvokeStatus`](crate::invoker::InvokeStatus)
//! and write the details into a caller supplied [`ErrorCollector`].
//! [`CoreError`] names every failure the core itself can report.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Core Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failures reported by the core into an [`ErrorCollector`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("another object is already registered with the same identifier: '{object_type}/{name}'")]
    AlreadyRegistered { object_type: String, name: String },

    #[error("type is not found in object registry: '{0}'")]
    TypeNotFound(String),

    #[error("object is not found in object registry: '{object_type}/{name}'")]
    ObjectNotFound { object_type: String, name: String },

    #[error("no objects are found in object registry for type: '{0}'")]
    NoObjectsOfType(String),

    #[error("object '{object_type}/{name}' is not a {expected}")]
    CapabilityMismatch {
        object_type: String,
        name: String,
        expected: &'static str,
    },

    #[error("interface is already registered: {0}")]
    InterfaceAlreadyRegistered(String),

    #[error("could not start interface: {0}")]
    InterfaceNotStarted(String),

    #[error("interface '{0}' could not be ended properly")]
    InterfaceNotEnded(String),

    #[error("could not open library: '{path}': {reason}")]
    LibraryOpen { path: String, reason: String },

    #[error("could not find procedure '{symbol}' in library '{path}': {reason}")]
    MissingSymbol {
        path: String,
        symbol: String,
        reason: String,
    },

    #[error("unable to get entrance object of the component '{0}'")]
    NoEntrance(String),

    #[error("components are not set")]
    NoComponents,

    #[error("component '{0}' could not be initialized")]
    ComponentInit(String),

    #[error("application is disabled")]
    Disabled,

    #[error("configuration entry is not set: '{0}'")]
    MissingConfigEntry(String),

    #[error("configuration entry '{path}' has an invalid value: '{value}'")]
    InvalidConfigEntry { path: String, value: String },

    #[error("could not create object '{id}' in '{manager}'")]
    CreateFailed { manager: String, id: u64 },

    #[error("'{manager}' cannot hold more than {capacity} objects")]
    CapacityExhausted { manager: String, capacity: usize },

    #[error("invoker is not found: '{0}'")]
    InvokerNotFound(String),

    #[error("communication failure: {0}")]
    CommunicationFailure(String),

    #[error("was not possible to connect to the server: {0}")]
    ServerNotFound(String),

    #[error("reconnect limit is reached after {0} recalls")]
    RecallLimit(u32),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("server fatal error: {0}")]
    ServerFatalError(String),

    #[error("not implemented on server: {0}")]
    ServerNotImplemented(String),

    #[error("no thread is available in thread pool '{0}'")]
    ThreadUnavailable(String),
}

impl CoreError {
    /// Stable numeric code for this error
    pub fn code(&self) -> i64 {
        match self {
            CoreError::AlreadyRegistered { .. } => codes::ALREADY_REGISTERED,
            CoreError::TypeNotFound(_) => codes::TYPE_NOT_FOUND,
            CoreError::ObjectNotFound { .. } => codes::OBJECT_NOT_FOUND,
            CoreError::NoObjectsOfType(_) => codes::OBJECT_NOT_FOUND,
            CoreError::CapabilityMismatch { .. } => codes::CAPABILITY_MISMATCH,
            CoreError::InterfaceAlreadyRegistered(_) => codes::INTERFACE_ALREADY_REGISTERED,
            CoreError::InterfaceNotStarted(_) => codes::INTERFACE_NOT_STARTED,
            CoreError::InterfaceNotEnded(_) => codes::INTERFACE_NOT_ENDED,
            CoreError::LibraryOpen { .. } => codes::LIBRARY_OPEN,
            CoreError::MissingSymbol { .. } => codes::MISSING_SYMBOL,
            CoreError::NoEntrance(_) => codes::NO_ENTRANCE,
            CoreError::NoComponents => codes::NO_COMPONENTS,
            CoreError::ComponentInit(_) => codes::COMPONENT_INIT,
            CoreError::Disabled => codes::DISABLED,
            CoreError::MissingConfigEntry(_) => codes::MISSING_CONFIG_ENTRY,
            CoreError::InvalidConfigEntry { .. } => codes::INVALID_CONFIG_ENTRY,
            CoreError::CreateFailed { .. } => codes::CREATE_FAILED,
            CoreError::CapacityExhausted { .. } => codes::CAPACITY_EXHAUSTED,
            CoreError::InvokerNotFound(_) => codes::INVOKER_NOT_FOUND,
            CoreError::CommunicationFailure(_) => codes::COMMUNICATION_FAILURE,
            CoreError::ServerNotFound(_) => codes::SERVER_NOT_FOUND,
            CoreError::RecallLimit(_) => codes::RECALL_LIMIT,
            CoreError::ServerError(_) => codes::SERVER_ERROR,
            CoreError::ServerFatalError(_) => codes::SERVER_FATAL_ERROR,
            CoreError::ServerNotImplemented(_) => codes::SERVER_NOT_IMPLEMENTED,
            CoreError::ThreadUnavailable(_) => codes::THREAD_UNAVAILABLE,
        }
    }
}

/// Numeric error codes, grouped by subsystem
pub mod codes {
    pub const ALREADY_REGISTERED: i64 = 101;
    pub const TYPE_NOT_FOUND: i64 = 102;
    pub const OBJECT_NOT_FOUND: i64 = 103;
    pub const CAPABILITY_MISMATCH: i64 = 104;

    pub const INTERFACE_ALREADY_REGISTERED: i64 = 201;
    pub const INTERFACE_NOT_STARTED: i64 = 202;
    pub const INTERFACE_NOT_ENDED: i64 = 203;

    pub const LIBRARY_OPEN: i64 = 301;
    pub const MISSING_SYMBOL: i64 = 302;
    pub const NO_ENTRANCE: i64 = 303;

    pub const NO_COMPONENTS: i64 = 401;
    pub const COMPONENT_INIT: i64 = 402;
    pub const DISABLED: i64 = 403;

    pub const MISSING_CONFIG_ENTRY: i64 = 501;
    pub const INVALID_CONFIG_ENTRY: i64 = 502;

    pub const CREATE_FAILED: i64 = 601;
    pub const CAPACITY_EXHAUSTED: i64 = 602;
    pub const INVOKER_NOT_FOUND: i64 = 603;

    pub const COMMUNICATION_FAILURE: i64 = 701;
    pub const SERVER_NOT_FOUND: i64 = 702;
    pub const RECALL_LIMIT: i64 = 703;
    pub const SERVER_ERROR: i64 = 704;
    pub const SERVER_FATAL_ERROR: i64 = 705;
    pub const SERVER_NOT_IMPLEMENTED: i64 = 706;

    pub const THREAD_UNAVAILABLE: i64 = 801;
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Collector
// ─────────────────────────────────────────────────────────────────────────────

/// Format an error entry the way every collector reports it
pub fn format_error(code: i64, text: &str) -> String {
    format!("[{code}] {text}")
}

/// Append-only sink for `(code, text)` pairs
pub trait ErrorCollector {
    /// Record an error and return its formatted `"[code] text"` form
    fn add(&mut self, code: i64, text: &str) -> String;

    /// Record a core error
    fn add_error(&mut self, error: &CoreError) -> String {
        self.add(error.code(), &error.to_string())
    }
}

/// A single collected error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub code: i64,
    pub text: String,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.text)
    }
}

/// Collector that keeps every entry
#[derive(Debug, Clone, Default)]
pub struct ErrorList {
    entries: Vec<ErrorEntry>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.entries.iter()
    }

    /// True if any entry carries `code`
    pub fn contains_code(&self, code: i64) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    /// Formatted entries joined by `separator`
    pub fn join(&self, separator: &str) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl ErrorCollector for ErrorList {
    fn add(&mut self, code: i64, text: &str) -> String {
        let entry = ErrorEntry {
            code,
            text: text.to_string(),
        };
        let formatted = entry.to_string();
        self.entries.push(entry);
        formatted
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a ErrorEntry;
    type IntoIter = std::slice::Iter<'a, ErrorEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Collector that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullErrors;

impl ErrorCollector for NullErrors {
    fn add(&mut self, code: i64, text: &str) -> String {
        format_error(code, text)
    }
}

/// Collector backed by a closure
pub struct FnErrorCollector<F: FnMut(i64, &str)> {
    sink: F,
}

impl<F: FnMut(i64, &str)> FnErrorCollector<F> {
    pub fn new(sink: F) -> Self {
        Self { sink }
    }
}

impl<F: FnMut(i64, &str)> ErrorCollector for FnErrorCollector<F> {
    fn add(&mut self, code: i64, text: &str) -> String {
        (self.sink)(code, text);
        format_error(code, text)
    }
}
