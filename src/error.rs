//! Error types for the bitmap RPC client.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or truncated frame on the wire.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Failure of the underlying stream connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server did not complete the session handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A reconnect succeeded at the transport level but the server issued a
    /// different session id, so the remote state tied to the old id is gone.
    #[error("session expired: server issued session id {actual}, expected {expected}")]
    SessionExpired {
        /// The id the session held before reconnecting.
        expected: u32,
        /// The id the server handed back.
        actual: u32,
    },

    /// The single reconnect-and-retry after a transport failure also failed.
    #[error("reconnect failed: {source}")]
    ReconnectFailed {
        /// The underlying failure.
        source: Box<Error>,
    },

    /// A well-formed response frame carrying a server-side error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Envelope serialization or deserialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The dispatcher pool has been closed.
    #[error("dispatcher pool is closed")]
    PoolClosed,

    /// Another task was initializing the client factory and failed.
    #[error("client factory initialization failed in another task")]
    InitFailed,

    /// Waiting on a concurrent factory initialization exceeded its budget.
    #[error("client factory initialization timed out after {0:?}")]
    InitTimeout(Duration),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this failure is transport-level and worth a single
    /// reconnect-and-retry. Remote application errors and expired sessions
    /// are deliberately excluded.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Frame(_) | Self::Transport(_))
    }

    pub(crate) fn reconnect_failed(source: Self) -> Self {
        Self::ReconnectFailed {
            source: Box::new(source),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Transport(TransportError::Io(err))
    }
}

/// Framing errors. Always transport-level: the stream position is lost, so
/// recovery means tearing the connection down and reconnecting.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream closed before a full 17-byte prefix arrived.
    #[error("stream closed while reading frame prefix")]
    TruncatedPrefix,

    /// The two size fields of the prefix disagree.
    #[error("corrupt frame prefix: size {size} does not match mirror {mirror}")]
    CorruptPrefix {
        /// Payload size in native byte order.
        size: u64,
        /// Payload size in big-endian byte order.
        mirror: u64,
    },

    /// The prefix announces a payload larger than the codec allows.
    #[error("frame size {size} exceeds maximum {max}")]
    TooLarge {
        /// Announced payload size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// The stream closed before the announced payload arrived.
    #[error("stream closed after {got} of {expected} payload bytes")]
    TruncatedPayload {
        /// Bytes the prefix announced.
        expected: usize,
        /// Bytes actually received.
        got: usize,
    },

    /// Caller asked for the empty-payload encoding but supplied a payload.
    #[error("refusing to encode a payload under the EMPTY flag")]
    PayloadWithEmptyFlag,
}

/// Transport-specific errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish the connection.
    #[error("unable to establish connection to {endpoint}: {source}")]
    ConnectFailed {
        /// The address we tried to connect to.
        endpoint: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The connection attempt did not complete within the allowed time.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// The address we tried to connect to.
        endpoint: String,
        /// The time allowed for the attempt.
        timeout: Duration,
    },

    /// Connection closed unexpectedly.
    #[error("connection closed unexpectedly")]
    Closed,

    /// The endpoint string could not be parsed or is unsupported here.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Generic I/O error on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
