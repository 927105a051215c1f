use crate::parser::Status;
use std::{fmt, io};

/// Errors surfaced by the client.
#[derive(Debug)]
pub enum Error {
    /// An illegal key (whitespace, too long), a malformed server spec, or an
    /// oversized value. Raised before any traffic is written.
    BadArgument(String),
    /// A mutating operation was invoked on a readonly client.
    Readonly,
    /// The server list is empty, or every rehash attempt landed on a dead
    /// server.
    NoServers,
    /// A single-thread-mode client was used from a thread other than the one
    /// that created it.
    Concurrency(String),
    /// The target server has no usable socket; the payload is the server's
    /// status string.
    Connection(String),
    /// An unexpected or ERROR response from a server.
    Protocol(Status),
    Io(io::Error),
}

impl Error {
    /// True for errors the server itself reported on a well-formed reply
    /// line. These are never retried and never quarantine the server;
    /// everything else that comes out of a request counts as a socket
    /// failure.
    pub(crate) fn is_server_reported(&self) -> bool {
        use crate::parser::ErrorKind;
        matches!(
            self,
            Error::Protocol(Status::Error(
                ErrorKind::Generic(_) | ErrorKind::Client(_) | ErrorKind::Server(_)
            ))
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadArgument(msg) => write!(f, "bad argument: {}", msg),
            Self::Readonly => write!(f, "Update of readonly cache"),
            Self::NoServers => write!(f, "No servers available"),
            Self::Concurrency(msg) => write!(f, "{}", msg),
            Self::Connection(status) => write!(f, "No connection to server ({})", status),
            Self::Protocol(e) => write!(f, "protocol: {}", e),
            Self::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Status> for Error {
    fn from(s: Status) -> Self {
        Error::Protocol(s)
    }
}

/// Outcome of one request against one endpoint, consumed by the facade's
/// outer retry envelope. `Unusable` means the endpoint cannot serve this
/// request (dead, unreachable, or it failed twice in a row) and the operation
/// may be retried once on a different server. `Fail` is final.
#[derive(Debug)]
pub(crate) enum OpError {
    Unusable(Error),
    Fail(Error),
}

impl OpError {
    pub(crate) fn into_error(self) -> Error {
        match self {
            OpError::Unusable(e) | OpError::Fail(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ErrorKind;

    #[test]
    fn connection_error_message_names_the_server_status() {
        let err = Error::Connection("DEAD: connection refused, will retry in 30s".to_string());
        assert!(err.to_string().starts_with("No connection to server ("));
    }

    #[test]
    fn server_reported_errors_are_final() {
        assert!(
            Error::Protocol(Status::Error(ErrorKind::Server("out of memory".into())))
                .is_server_reported()
        );
        assert!(!Error::Protocol(Status::Error(ErrorKind::Protocol(None))).is_server_reported());
        assert!(!Error::Io(io::ErrorKind::UnexpectedEof.into()).is_server_reported());
    }
}
