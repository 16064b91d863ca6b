//! Physical transports.
//!
//! Two interchangeable variants exist. [`StreamTransport`] rides the tokio
//! reactor and suspends the calling task on I/O; it is the right choice
//! whenever a cooperative scheduler is driving the current thread.
//! [`BlockingTransport`] uses the host's native socket facility and never
//! suspends, which makes it correct in plain worker processes where no
//! reactor exists to drive the async sockets. The variant is picked once at
//! construction from an explicit [`RuntimeContext`].

mod blocking;
mod stream;

pub use blocking::BlockingTransport;
pub use stream::StreamTransport;

use crate::error::{Result, TransportError};
use crate::protocol::Frame;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable overriding the default connection address.
pub const ENDPOINT_ENV: &str = "BITMAP_RPC_ADDR";

const DEFAULT_UNIX_ADDR: &str = "unix:///tmp/bitmap-rpc.sock";
const DEFAULT_TCP_ADDR: &str = "tcp://127.0.0.1:37101";

/// Whether a cooperative scheduler is active on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeContext {
    /// A tokio runtime is driving this thread; I/O must suspend the task.
    Cooperative,
    /// No scheduler present; plain blocking I/O is correct.
    Blocking,
}

impl RuntimeContext {
    /// Probe the ambient runtime.
    #[must_use]
    pub fn current() -> Self {
        if tokio::runtime::Handle::try_current().is_ok() {
            Self::Cooperative
        } else {
            Self::Blocking
        }
    }

    /// Whether this context is scheduler-driven.
    #[must_use]
    pub const fn is_cooperative(self) -> bool {
        matches!(self, Self::Cooperative)
    }
}

/// A connection address: `tcp://host:port` or `unix:///path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP socket address.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Resolve the endpoint from [`ENDPOINT_ENV`], falling back to a local
    /// domain socket on Unix hosts and loopback TCP elsewhere.
    pub fn from_env() -> Result<Self> {
        match std::env::var(ENDPOINT_ENV) {
            Ok(addr) => addr.parse(),
            Err(_) => {
                if cfg!(unix) {
                    DEFAULT_UNIX_ADDR.parse()
                } else {
                    DEFAULT_TCP_ADDR.parse()
                }
            }
        }
    }
}

impl FromStr for Endpoint {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()).into());
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()).into());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        Err(TransportError::InvalidEndpoint(s.to_string()).into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Capability set of a physical transport.
///
/// `send` and `recv` connect lazily, so a freshly constructed transport can
/// be used directly. One frame out, one frame in; ordering across distinct
/// transports is not guaranteed.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection. A no-op when already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Receive one frame.
    async fn recv(&mut self) -> Result<Frame>;

    /// Tear the connection down. A no-op when not connected.
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport currently holds a live connection.
    fn is_connected(&self) -> bool;
}

/// Select the transport variant for an execution context.
#[must_use]
pub fn for_context(endpoint: Endpoint, ctx: RuntimeContext) -> Box<dyn Transport> {
    match ctx {
        RuntimeContext::Cooperative => Box::new(StreamTransport::new(endpoint)),
        RuntimeContext::Blocking => Box::new(BlockingTransport::new(endpoint)),
    }
}
