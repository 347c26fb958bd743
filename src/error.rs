use crate::{connection_status::ConnectionState, provider::Status};
use std::{error, fmt};

/// A std Result with an ems_client::Error error type
pub type Result<T> = std::result::Result<T, Error>;

/// The type of error that can be returned in this crate.
///
/// Even though we expose the complete enumeration of possible error variants, it is not
/// considered stable to exhaustively match on this enumeration: do it at your own risk.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The provider refused to hand out an error context, so no later failure
    /// could be described.
    ErrorContextCreation(Status),
    /// A provider primitive failed; `message` and `stack_trace` come from the
    /// provider's error context.
    Provider {
        status: Status,
        message: String,
        stack_trace: String,
    },
    InvalidConnectionState(ConnectionState),
    InvalidDestinationKind(String),
    InvalidServerUrl(String),
    ConnectionStop(Box<Error>),
    ConnectionClose(Box<Error>),
}

impl Error {
    /// The provider status behind this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::ErrorContextCreation(status) => Some(*status),
            Error::Provider { status, .. } => Some(*status),
            Error::ConnectionStop(e) | Error::ConnectionClose(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status() == Some(Status::Timeout)
    }

    /// The provider's stack trace for this failure, empty when it gave none.
    pub fn stack_trace(&self) -> &str {
        match self {
            Error::Provider { stack_trace, .. } => stack_trace,
            Error::ConnectionStop(e) | Error::ConnectionClose(e) => e.stack_trace(),
            _ => "",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ErrorContextCreation(status) => {
                write!(f, "failed to create error context: {}", status)
            }
            Error::Provider {
                status, message, ..
            } => {
                if message.is_empty() {
                    write!(f, "provider error: {}", status)
                } else {
                    write!(f, "{}", message)
                }
            }
            Error::InvalidConnectionState(state) => {
                write!(f, "invalid connection state: {:?}", state)
            }
            Error::InvalidDestinationKind(kind) => {
                write!(f, "invalid destination kind: {:?}", kind)
            }
            Error::InvalidServerUrl(reason) => write!(f, "invalid server url: {}", reason),
            Error::ConnectionStop(e) => write!(f, "failed to stop connection: {}", e),
            Error::ConnectionClose(e) => write!(f, "failed to close connection: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::ErrorContextCreation(status) => Some(status),
            Error::Provider { status, .. } => Some(status),
            Error::ConnectionStop(e) | Error::ConnectionClose(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(other: url::ParseError) -> Self {
        Error::InvalidServerUrl(other.to_string())
    }
}
