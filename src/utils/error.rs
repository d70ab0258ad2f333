//! The `error` module defines the single error value surfaced by every public
//! operation in `brokerlink`.
//!
//! Failures are distinguished by their message and context rather than by
//! type: configuration mistakes, provider exceptions, conversion problems and
//! handler failures all come back as an [`Error`] carrying a human readable
//! message and, when a provider raised it, the provider error as its source.
//! [`ErrorKind`] exists so callers can branch without parsing messages.

use std::fmt;

use thiserror::Error;

use crate::broker::ProviderError;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any provider call. Never retried.
    Configuration,
    /// Raised by the broker provider during a lifecycle or messaging call.
    Provider,
    /// A message could not be mapped between the wire and the application model.
    Conversion,
    /// The connection, session or endpoint was already closed.
    Closed,
    /// An attached message handler failed.
    Handler,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Provider => "provider",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Closed => "closed",
            ErrorKind::Handler => "handler",
        };
        f.write_str(name)
    }
}

/// The flat error shape shared by the whole crate.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conversion, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    /// Wraps a provider error behind an operation specific prefix.
    ///
    /// The provider's own message is appended to the prefix and the provider
    /// error is kept as the source. A provider `Closed` error keeps the
    /// `Closed` kind so callers can tell a torn down resource from a failure.
    pub fn provider(context: &str, cause: ProviderError) -> Self {
        let kind = if cause.is_closed() {
            ErrorKind::Closed
        } else {
            ErrorKind::Provider
        };
        Self {
            kind,
            message: format!("{context}: {cause}"),
            cause: Some(Box::new(cause)),
        }
    }

    /// Re-wraps an error under a new message, keeping the original as the source.
    pub fn wrap(context: &str, cause: Error) -> Self {
        Self {
            kind: cause.kind,
            message: format!("{context}: {}", cause.message),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.kind == ErrorKind::Closed
    }
}
