//! Error types
//!
//! Every fallible operation returns [`Error`]. Each variant maps onto one of
//! five kinds (see [`ErrorKind`]) that mirror the negative return codes of the
//! wire-level library: timeout, stream lost, bad argument, internal fault and
//! invalid handle.
//!
//! Expected "nothing happened" outcomes are not errors: a pull that times out
//! returns a `0.0` timestamp, a resolve that finds nothing returns an empty
//! vector and a chunk pull with no data returns a count of zero.

use std::fmt;

use crate::query::QueryError;
use crate::xml::XmlError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Closed error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation exceeded its deadline
    Timeout,
    /// The source disappeared and was not (or could not be) recovered
    StreamLost,
    /// Malformed or out-of-range caller input
    Argument,
    /// Fault inside the library or the operating system
    Internal,
    /// Operation attempted on a closed or never-bound object
    InvalidHandle,
}

impl ErrorKind {
    /// Native-style negative error code
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Timeout => -1,
            ErrorKind::StreamLost => -2,
            ErrorKind::Argument => -3,
            ErrorKind::Internal => -4,
            ErrorKind::InvalidHandle => -5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::StreamLost => "stream lost",
            ErrorKind::Argument => "argument error",
            ErrorKind::Internal => "internal error",
            ErrorKind::InvalidHandle => "invalid handle",
        };
        f.write_str(name)
    }
}

/// Main error type
#[derive(Debug)]
pub enum Error {
    /// Operation exceeded its deadline
    Timeout,
    /// Stream source was lost
    StreamLost,
    /// Invalid argument (buffer size, channel count, name, ...)
    Argument(String),
    /// Internal failure
    Internal(String),
    /// Handle was closed or never bound to the network
    InvalidHandle,
    /// Socket I/O error
    Io(std::io::Error),
    /// Malformed metadata document
    Xml(XmlError),
    /// Malformed query predicate
    Query(QueryError),
}

impl Error {
    /// Build an argument error from any displayable message
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Error::Argument(msg.into())
    }

    /// Build an internal error from any displayable message
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Which kind of the closed taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout => ErrorKind::Timeout,
            Error::StreamLost => ErrorKind::StreamLost,
            Error::Argument(_) | Error::Xml(_) | Error::Query(_) => ErrorKind::Argument,
            Error::Internal(_) | Error::Io(_) => ErrorKind::Internal,
            Error::InvalidHandle => ErrorKind::InvalidHandle,
        }
    }

    /// Native-style negative error code
    pub fn code(&self) -> i32 {
        self.kind().code()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "Operation timed out"),
            Error::StreamLost => write!(f, "Stream source has been lost"),
            Error::Argument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::InvalidHandle => write!(f, "Handle is closed or not bound"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Xml(e) => write!(f, "Metadata error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Xml(e) => Some(e),
            Error::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<XmlError> for Error {
    fn from(e: XmlError) -> Self {
        Error::Xml(e)
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Error::Query(e)
    }
}
