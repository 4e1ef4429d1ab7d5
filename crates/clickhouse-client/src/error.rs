//! Client error types.

use std::time::Duration;

use ch_protocol::{Exception, ProtocolError};
use clickhouse_codec::CodecError;
use clickhouse_driver_pool::PoolError;
use thiserror::Error;

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid options or DSN.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every address failed; carries the last failure.
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        /// Address of the last attempt.
        addr: String,
        /// Why the last attempt failed.
        #[source]
        source: Box<Error>,
    },

    /// No connection became available in time.
    #[error("no connection available within {timeout:?}")]
    PoolExhausted {
        /// How long the checkout waited.
        timeout: Duration,
    },

    /// The client has been closed.
    #[error("client is closed")]
    PoolClosed,

    /// Exception raised by the server.
    #[error("server exception: {0}")]
    Server(#[from] Exception),

    /// Malformed or out-of-order protocol data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Framing or compression failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// API used out of order, or data that does not fit the target schema.
    #[error("misuse: {0}")]
    Misuse(String),

    /// Query parameters could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// A result value could not be converted to the requested type.
    #[error("type error: {0}")]
    Type(String),
}

impl Error {
    /// Server exception code, if this is a server error.
    #[must_use]
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Self::Server(e) => Some(e.code),
            Self::Dial { source, .. } => source.server_code(),
            _ => None,
        }
    }

    /// Whether retrying the operation later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } | Self::Io(_) | Self::Codec(_) => true,
            Self::Dial { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether the error leaves the session unusable.
    ///
    /// Server exceptions end the query cleanly; usage and binding errors are
    /// caught before anything is written.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Codec(_) | Self::Io(_) | Self::Tls(_)
        )
    }
}

impl From<PoolError<Error>> for Error {
    fn from(err: PoolError<Error>) -> Self {
        match err {
            PoolError::Timeout(timeout) => Self::PoolExhausted { timeout },
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::Connect { addr, source } => Self::Dial {
                addr,
                source: Box::new(source),
            },
            PoolError::Config(msg) => Self::Config(msg),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use ch_protocol::exception::codes;

    #[test]
    fn test_pool_errors_map_to_client_errors() {
        let err: Error = PoolError::<Error>::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(
            err,
            Error::PoolExhausted { timeout } if timeout == Duration::from_secs(1)
        ));

        let err: Error = PoolError::Connect {
            addr: "10.0.0.1:9000".into(),
            source: Error::Server(Exception::new(
                codes::AUTHENTICATION_FAILED,
                "DB::Exception",
                "bad password",
            )),
        }
        .into();
        assert!(err.to_string().contains("10.0.0.1:9000"));
        assert_eq!(err.server_code(), Some(codes::AUTHENTICATION_FAILED));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_session_fatality() {
        assert!(Error::Io(std::io::Error::other("reset")).is_fatal_to_session());
        assert!(!Error::Misuse("batch already sent".into()).is_fatal_to_session());
        assert!(
            !Error::Server(Exception::new(62, "DB::Exception", "syntax")).is_fatal_to_session()
        );
    }
}
