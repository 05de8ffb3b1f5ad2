use std::sync::OnceLock;

use regex::Regex;

use crate::error::Error;

/// What an endpoint failure means to the lifecycle code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    AlreadyStopped,
    Transient,
    Unclassified,
}

const NOT_FOUND: u16 = 404;
const TRANSIENT_STATUSES: &[u16] = &[429, 502, 503, 504];

fn not_found_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bnot found\b").expect("invalid not-found regex"))
}

fn already_stopped_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(already stopped|is not running)").expect("invalid already-stopped regex")
    })
}

fn transient_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(connection refused|connection reset|timed out|timeout)")
            .expect("invalid transient regex")
    })
}

/// Classify an endpoint error by status code first, then message.
pub fn classify(status: u16, message: &str) -> ErrorClass {
    if status == NOT_FOUND {
        return ErrorClass::NotFound;
    }
    if TRANSIENT_STATUSES.contains(&status) {
        return ErrorClass::Transient;
    }
    classify_message(message)
}

fn classify_message(message: &str) -> ErrorClass {
    if already_stopped_regex().is_match(message) {
        ErrorClass::AlreadyStopped
    } else if not_found_regex().is_match(message) {
        ErrorClass::NotFound
    } else if transient_regex().is_match(message) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unclassified
    }
}

/// Classify an error already surfaced by the endpoint adapter.
pub fn classify_error(err: &Error) -> ErrorClass {
    match err {
        Error::NotFound { .. } => ErrorClass::NotFound,
        Error::Endpoint {
            status, message, ..
        } => classify(*status, message),
        Error::AsyncOperation { message, .. } => classify_message(message),
        Error::Transport { .. } => ErrorClass::Transient,
        _ => ErrorClass::Unclassified,
    }
}

/// What a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An existing instance, by name.
    Instance(String),
    /// A collection or a new object; a not-found answer says nothing about
    /// any instance.
    Other(String),
}

impl Target {
    pub fn instance(name: &str) -> Self {
        Target::Instance(name.to_string())
    }

    pub fn other(name: &str) -> Self {
        Target::Other(name.to_string())
    }
}

/// Build the crate error for an endpoint error envelope. A not-found answer
/// for an instance target becomes [`Error::NotFound`]; everything else keeps
/// the status and message as [`Error::Endpoint`].
pub fn endpoint_error(operation: &str, target: &Target, status: u16, message: &str) -> Error {
    match (target, classify(status, message)) {
        (Target::Instance(name), ErrorClass::NotFound) => Error::NotFound {
            operation: operation.to_string(),
            name: name.clone(),
            message: message.to_string(),
        },
        _ => Error::Endpoint {
            operation: operation.to_string(),
            status,
            message: message.to_string(),
        },
    }
}
