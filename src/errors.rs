//! Error types for the dispatch layer.
//!
//! Every failure carries a machine classification (`ErrorKind`) plus the
//! runtime's free-text diagnostic, drained from the process-wide error
//! buffer the moment the error is constructed. The buffer is a single
//! slot that the next runtime failure overwrites, so it is always
//! read-then-cleared here and nowhere else.

use crate::engine;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation name not present in the runtime catalogue.
    NoSuchOperation { name: String },
    /// Wrong count of required positional arguments.
    ArityMismatch { operation: String, expected: usize, found: usize },
    /// Keyword argument not declared optional for this operation.
    UnknownArgument { operation: String, name: String },
    /// No conversion rule registered for this type tag, or the host value
    /// does not match the rule that is registered.
    UnsupportedType { type_name: String },
    /// String does not name a member of the target enum.
    InvalidEnumValue { enum_name: String, value: String },
    /// Auto-promotion needed a template object but none was found among
    /// the arguments.
    NoMatchTarget { operation: String },
    /// The runtime's own execution failed.
    OperationFailed { operation: String },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchOperation { name } => {
                write!(f, "no such operation: {}", name)
            }
            Self::ArityMismatch { operation, expected, found } => {
                write!(
                    f,
                    "unable to call {}: {} arguments given, but {} required",
                    operation, found, expected
                )
            }
            Self::UnknownArgument { operation, name } => {
                write!(f, "{} does not support argument '{}'", operation, name)
            }
            Self::UnsupportedType { type_name } => {
                write!(f, "unsupported type {}", type_name)
            }
            Self::InvalidEnumValue { enum_name, value } => {
                write!(f, "'{}' is not a member of enum {}", value, enum_name)
            }
            Self::NoMatchTarget { operation } => {
                write!(f, "unable to call {}: no object argument to match constants against", operation)
            }
            Self::OperationFailed { operation } => {
                write!(f, "unable to call {}", operation)
            }
        }
    }
}

/// An error from the dispatch layer or the underlying runtime.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    /// Free-text diagnostics drained from the runtime error buffer.
    pub detail: String,
}

impl Error {
    /// Wrap a kind, draining the runtime error buffer into `detail`.
    pub fn new(kind: ErrorKind) -> Self {
        let detail = engine::error::take();
        Self { kind, detail }
    }

    /// Wrap a kind with an explicit detail string; the runtime buffer is
    /// still cleared so stale text cannot attach to a later error.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        engine::error::clear();
        Self { kind, detail: detail.into() }
    }

    pub fn no_such_operation(name: &str) -> Self {
        Self::new(ErrorKind::NoSuchOperation { name: name.to_string() })
    }

    pub fn arity(operation: &str, expected: usize, found: usize) -> Self {
        Self::new(ErrorKind::ArityMismatch {
            operation: operation.to_string(),
            expected,
            found,
        })
    }

    pub fn unknown_argument(operation: &str, name: &str) -> Self {
        Self::new(ErrorKind::UnknownArgument {
            operation: operation.to_string(),
            name: name.to_string(),
        })
    }

    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedType { type_name: type_name.into() })
    }

    pub fn invalid_enum(enum_name: impl Into<String>, value: &str) -> Self {
        Self::new(ErrorKind::InvalidEnumValue {
            enum_name: enum_name.into(),
            value: value.to_string(),
        })
    }

    pub fn no_match_target(operation: &str) -> Self {
        Self::new(ErrorKind::NoMatchTarget { operation: operation.to_string() })
    }

    pub fn operation_failed(operation: &str) -> Self {
        Self::new(ErrorKind::OperationFailed { operation: operation.to_string() })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.detail.is_empty() {
            write!(f, "\n  {}", self.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}
