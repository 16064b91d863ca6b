//! Native-socket transport for contexts without a cooperative scheduler.

use crate::error::{Result, TransportError};
use crate::protocol::Frame;
use crate::transport::{Endpoint, Transport};
use async_trait::async_trait;
use std::io::{Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use tracing::debug;

trait RawStream: Read + Write + Send {}

impl<T: Read + Write + Send> RawStream for T {}

/// Transport on `std::net` sockets.
///
/// The async methods never suspend; every await point resolves immediately,
/// so a trivial executor such as `futures::executor::block_on` can drive
/// them on a thread with no reactor. Do not use this variant on a runtime
/// worker thread: its reads block the whole thread.
pub struct BlockingTransport {
    endpoint: Endpoint,
    stream: Option<Box<dyn RawStream>>,
}

impl BlockingTransport {
    /// Create a disconnected transport for the given endpoint.
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: None,
        }
    }

    fn open(&self) -> Result<Box<dyn RawStream>> {
        let connect_err = |e| TransportError::ConnectFailed {
            endpoint: self.endpoint.to_string(),
            source: e,
        };
        match &self.endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).map_err(connect_err)?;
                stream.set_nodelay(true).map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                Err(TransportError::InvalidEndpoint(self.endpoint.to_string()).into())
            }
        }
    }
}

#[async_trait]
impl Transport for BlockingTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open()?);
            debug!(endpoint = %self.endpoint, "blocking transport connected");
        }
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.connect().await?;
        match self.stream.as_mut() {
            Some(stream) => frame.write_to(stream),
            None => Err(TransportError::Closed.into()),
        }
    }

    async fn recv(&mut self) -> Result<Frame> {
        self.connect().await?;
        match self.stream.as_mut() {
            Some(stream) => Frame::read_from(stream),
            None => Err(TransportError::Closed.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the socket closes it.
        self.stream = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
