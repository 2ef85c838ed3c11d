//! Unified error type.
//!
//! Everything that can escape a middleware chain is an [`Error`]. There is
//! no second error shape: the lifecycle controller, the error hook, and the
//! transport fallback all speak this one type, so a malformed error value
//! cannot exist at runtime.

use http::StatusCode;

/// The error type carried through a middleware chain and by allium's
/// fallible operations.
///
/// Middleware are free to catch and recover internally; anything that
/// escapes is routed through the application's single error hook.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A middleware invoked its downstream continuation more than once.
    ///
    /// Calling `next` zero times is a legitimate short-circuit; calling it
    /// twice is a defect and fails the whole chain at the second call.
    #[error("next() called more than once within a single middleware")]
    NextCalledTwice,

    /// The underlying connection finished before the chain settled.
    #[error("connection closed before the response was ready")]
    ConnectionClosed,

    /// An HTTP-level failure raised by a middleware, typically via
    /// [`Error::throw`].
    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        /// Safe to surface to the client in the fallback response body.
        expose: bool,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure a middleware produced.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Raises an HTTP error with the given status and message.
    ///
    /// Client errors (4xx) are exposed to the client by default — 400s are
    /// the caller's fault, 500s are ours:
    ///
    /// ```rust
    /// use allium::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::throw(StatusCode::UNPROCESSABLE_ENTITY, "name required");
    /// assert!(err.is_exposed());
    /// assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    /// ```
    pub fn throw(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            expose: status.is_client_error(),
        }
    }

    /// The HTTP status this error maps to. `500` unless the error carries
    /// its own status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error message is safe to write into the client-visible
    /// fallback response.
    pub fn is_exposed(&self) -> bool {
        match self {
            Self::Http { expose, .. } => *expose,
            _ => false,
        }
    }
}
