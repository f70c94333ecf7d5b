//! Error and exception types.
//!
//! Two layers, mirroring the split between engine-internal errors and the
//! public surface:
//!
//! - [`RunError`] / [`Raised`] / [`Signal`] are the internal unwinding
//!   channel. `RunError` describes an engine-raised condition (type mismatch,
//!   missing key, ...); `Raised` adds the optional user payload carried by
//!   `raise`; `Signal` is what actually travels up the evaluator: either a
//!   raise or a coroutine suspension.
//! - [`Exception`] is the public, owned diagnostic handed out by `Runner`
//!   and printed by the CLI.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::{
    heap::Heap,
    token::{CodeLoc, CodeRange, ParseError},
    value::Value,
};

/// Message delivered when a cancelled coroutine resumes.
pub const CANCELLED_ERROR_MSG: &str = "coroutine was cancelled";

/// Kinds of error the engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ExcType {
    SyntaxError,
    TypeError,
    NameError,
    AttributeError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    OverflowError,
    ValueError,
    ArityError,
    AwaitError,
    RecursionError,
    CancelledError,
    /// A bare user `raise`.
    Error,
}

/// An engine-raised error: kind, message, and the source range it is
/// anchored to once the evaluator has attached one.
#[derive(Debug, Clone)]
pub(crate) struct RunError {
    pub exc: ExcType,
    pub message: String,
    pub range: Option<CodeRange>,
}

pub(crate) type RunResult<T> = Result<T, RunError>;

impl RunError {
    pub fn new(exc: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc,
            message: message.into(),
            range: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::TypeError, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ExcType::NameError, format!("name `{name}` is not defined"))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ExcType::AttributeError,
            format!("{type_name} has no attribute `{attr}`"),
        )
    }

    pub fn key_error(key: &str) -> Self {
        Self::new(ExcType::KeyError, format!("key `{key}` not found"))
    }

    pub fn index_error(index: i64, len: usize) -> Self {
        Self::new(
            ExcType::IndexError,
            format!("index {index} out of range for length {len}"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ExcType::CancelledError, CANCELLED_ERROR_MSG)
    }

    /// Anchors the error at `range` unless an inner expression already did.
    #[must_use]
    pub fn with_range(mut self, range: CodeRange) -> Self {
        if self.range.is_none() {
            self.range = Some(range);
        }
        self
    }
}

/// A raised exception in flight: the engine error plus the user payload
/// value when the exception came from a `raise` statement.
#[derive(Debug)]
pub(crate) struct Raised {
    pub error: RunError,
    pub payload: Option<Value>,
}

impl Raised {
    pub fn clone_with_heap(&self, heap: &Heap) -> Self {
        Self {
            error: self.error.clone(),
            payload: self.payload.as_ref().map(|v| v.clone_with_heap(heap)),
        }
    }

    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Some(payload) = self.payload {
            payload.drop_with_heap(heap);
        }
    }
}

impl From<RunError> for Raised {
    fn from(error: RunError) -> Self {
        Self { error, payload: None }
    }
}

/// Non-local exit travelling up the evaluator.
#[derive(Debug)]
pub(crate) enum Signal {
    /// An exception is propagating; unwinds until a `catch` consumes it.
    Raise(Raised),
    /// The active coroutine suspended at an `await`; unwinds to the event
    /// loop, building the resume path on the way out.
    Suspend,
}

impl From<RunError> for Signal {
    fn from(error: RunError) -> Self {
        Self::Raise(error.into())
    }
}

impl From<Raised> for Signal {
    fn from(raised: Raised) -> Self {
        Self::Raise(raised)
    }
}

/// A finished, owned diagnostic: what went wrong and where.
#[derive(Debug, Clone)]
pub struct Exception {
    pub exc_type: ExcType,
    pub message: String,
    pub file: String,
    pub loc: CodeLoc,
}

impl Exception {
    pub(crate) fn from_parse_error(err: ParseError, file: &str) -> Self {
        Self {
            exc_type: ExcType::SyntaxError,
            message: err.message,
            file: file.to_owned(),
            loc: err.loc,
        }
    }

    pub(crate) fn from_run_error(err: RunError, file: &str) -> Self {
        let loc = err.range.map_or(CodeLoc::start(), |r| r.start);
        Self {
            exc_type: err.exc,
            message: err.message,
            file: file.to_owned(),
            loc,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.exc_type == ExcType::SyntaxError {
            "[Syntax Error]"
        } else {
            "[Unhandled Exception]"
        };
        let prefix = match self.exc_type {
            ExcType::SyntaxError | ExcType::Error => String::new(),
            other => format!("{other}: "),
        };
        write!(
            f,
            "{tag} in {} at {}: {prefix}{}",
            self.file, self.loc, self.message
        )
    }
}

impl std::error::Error for Exception {}
