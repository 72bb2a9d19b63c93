//! Error types.

use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// The error type used by the optimizer and its components.
#[derive(Debug)]
pub enum OptimizerError {
    /// This error indicates that a function of the optimizer or its components has been called with an invalid argument.
    Argument(ArgumentError),
    /// This error indicates that one of internal invariants of the optimizer or its components has been violated.
    /// The optimization can not continue and its memo is discarded.
    Internal(InternalError),
    /// This error indicates that a block of code has not been implemented.
    NotImplemented(String),
    /// This error indicates that the given query contains a construct the optimizer can not handle.
    /// The caller is expected to plan the query with a different planner.
    Unsupported(String),
    /// This error indicates that the search has run out of one of its resources or has been cancelled.
    ResourceExhausted(ResourceError),
    /// This error indicates that a catalog object is missing or malformed.
    Catalog(String),
}

impl OptimizerError {
    /// Creates an [argument error](OptimizerError::Argument).
    /// This method is a shorthand for `OptimizerError::Argument(ArgumentError::new(message))`.
    pub fn argument<T>(message: T) -> OptimizerError
    where
        T: Into<String>,
    {
        OptimizerError::Argument(ArgumentError::new(message))
    }

    /// Creates an [internal error](OptimizerError::Internal).
    /// This method is a shorthand for `OptimizerError::Internal(InternalError::new(message, None))`.
    pub fn internal<T>(message: T) -> OptimizerError
    where
        T: Into<String>,
    {
        OptimizerError::Internal(InternalError::new(message, None))
    }

    /// Creates an [unsupported error](OptimizerError::Unsupported).
    pub fn unsupported<T>(message: T) -> OptimizerError
    where
        T: Into<String>,
    {
        OptimizerError::Unsupported(message.into())
    }

    /// Creates a [catalog error](OptimizerError::Catalog).
    pub fn catalog<T>(message: T) -> OptimizerError
    where
        T: Into<String>,
    {
        OptimizerError::Catalog(message.into())
    }

    /// Creates a [resource exhausted error](OptimizerError::ResourceExhausted).
    pub fn resource<T>(kind: ResourceKind, message: T) -> OptimizerError
    where
        T: Into<String>,
    {
        OptimizerError::ResourceExhausted(ResourceError {
            kind,
            message: message.into(),
        })
    }

    /// Returns `true` if the query should be planned by a fallback planner.
    /// Both unsupported constructs and exhausted resources are recoverable at the top level.
    pub fn is_fallback(&self) -> bool {
        matches!(self, OptimizerError::Unsupported(_) | OptimizerError::ResourceExhausted(_))
    }
}

impl Display for OptimizerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerError::Argument(err) => write!(f, "Argument error: {}", err),
            OptimizerError::Internal(err) => write!(f, "Internal error: {}", err),
            OptimizerError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            OptimizerError::Unsupported(msg) => write!(f, "Not supported: {}", msg),
            OptimizerError::ResourceExhausted(err) => write!(f, "Resource exhausted: {}", err),
            OptimizerError::Catalog(msg) => write!(f, "Catalog error: {}", msg),
        }
    }
}

impl Error for OptimizerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OptimizerError::Internal(InternalError { cause: Some(error), .. }) => Some(error),
            _ => None,
        }
    }
}

impl From<ArgumentError> for OptimizerError {
    fn from(err: ArgumentError) -> Self {
        OptimizerError::Argument(err)
    }
}

impl From<InternalError> for OptimizerError {
    fn from(err: InternalError) -> Self {
        OptimizerError::Internal(err)
    }
}

impl From<ResourceError> for OptimizerError {
    fn from(err: ResourceError) -> Self {
        OptimizerError::ResourceExhausted(err)
    }
}

/// Argument error. See [OptimizerError::Argument].
#[derive(Debug)]
pub struct ArgumentError {
    message: String,
    backtrace: Backtrace,
}

impl ArgumentError {
    /// Creates a new instance of an [ArgumentError].
    pub fn new<T>(message: T) -> Self
    where
        T: Into<String>,
    {
        ArgumentError {
            message: message.into(),
            backtrace: Backtrace::new(),
        }
    }

    /// The backtrace captured when this error has been created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl Display for ArgumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.message)
    }
}

/// Internal error. See [OptimizerError::Internal].
#[derive(Debug)]
pub struct InternalError {
    message: String,
    cause: Option<Box<OptimizerError>>,
    backtrace: Backtrace,
}

impl InternalError {
    /// Creates an instance of an [InternalError] with the given message and an optional cause.
    /// This method captures a backtrace.
    pub fn new<T>(message: T, err: Option<OptimizerError>) -> Self
    where
        T: Into<String>,
    {
        InternalError {
            message: message.into(),
            cause: err.map(Box::new),
            backtrace: Backtrace::new(),
        }
    }

    /// Creates an instance of an [InternalError] with the given message and cause.
    /// This method captures a backtrace.
    pub fn with_cause<T>(message: T, cause: OptimizerError) -> Self
    where
        T: Into<String>,
    {
        InternalError::new(message, Some(cause))
    }

    /// The backtrace captured when this error has been created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl From<&str> for InternalError {
    fn from(message: &str) -> Self {
        InternalError::new(message, None)
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        InternalError::new(message, None)
    }
}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = self.cause.as_ref() {
            write!(f, " caused by: {}", cause)?
        }
        Ok(())
    }
}

/// The kind of a resource that has been exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// The optimization has been cancelled by the caller.
    Cancelled,
    /// The time limit of the search has been reached.
    Timeout,
    /// The memo has reached its maximum size.
    MemoLimit,
    /// The maximum number of alternatives of a search stage has been reached.
    AlternativesBudget,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cancelled => write!(f, "cancelled"),
            ResourceKind::Timeout => write!(f, "timeout"),
            ResourceKind::MemoLimit => write!(f, "memo limit"),
            ResourceKind::AlternativesBudget => write!(f, "alternatives budget"),
        }
    }
}

/// Resource exhaustion error. See [OptimizerError::ResourceExhausted].
#[derive(Debug)]
pub struct ResourceError {
    kind: ResourceKind,
    message: String,
}

impl ResourceError {
    /// The kind of the exhausted resource.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Display for ResourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod test {
    use crate::error::{InternalError, OptimizerError, ResourceKind};
    use std::error::Error;

    #[test]
    fn internal_error_source() {
        let source_error = OptimizerError::internal("err");
        let expected_source_error = format!("{}", source_error);

        let err = OptimizerError::Internal(InternalError::new("err", Some(source_error)));
        assert!(err.source().is_some(), "no source error");

        let actual_source_error = err.source().unwrap();
        assert_eq!(format!("{}", actual_source_error), expected_source_error, "source error")
    }

    #[test]
    fn internal_error_without_source() {
        let err = OptimizerError::Internal(InternalError::new("err", None));
        assert!(err.source().is_none())
    }

    #[test]
    fn fallback_errors() {
        assert!(OptimizerError::unsupported("correlated apply").is_fallback());
        assert!(OptimizerError::resource(ResourceKind::Timeout, "stage 0").is_fallback());
        assert!(!OptimizerError::internal("broken memo").is_fallback());
        assert!(!OptimizerError::catalog("no table").is_fallback());
    }

    #[test]
    fn resource_error_display() {
        let err = OptimizerError::resource(ResourceKind::Cancelled, "by user");
        assert_eq!(format!("{}", err), "Resource exhausted: cancelled: by user");
    }
}
