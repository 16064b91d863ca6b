//! Scheduler-aware transport on the tokio reactor.

use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameCodec};
use crate::transport::{Endpoint, Transport};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

enum Socket {
    Tcp(Framed<TcpStream, FrameCodec>),
    #[cfg(unix)]
    Unix(Framed<UnixStream, FrameCodec>),
}

impl Socket {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        match self {
            Self::Tcp(framed) => framed.send(frame).await,
            #[cfg(unix)]
            Self::Unix(framed) => framed.send(frame).await,
        }
    }

    async fn recv(&mut self) -> Result<Frame> {
        let next = match self {
            Self::Tcp(framed) => framed.next().await,
            #[cfg(unix)]
            Self::Unix(framed) => framed.next().await,
        };
        next.unwrap_or_else(|| Err(TransportError::Closed.into()))
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Tcp(framed) => framed.close().await,
            #[cfg(unix)]
            Self::Unix(framed) => framed.close().await,
        }
    }
}

/// Transport on tokio sockets; blocking reads suspend the task, never the
/// worker thread.
pub struct StreamTransport {
    endpoint: Endpoint,
    connect_timeout: Duration,
    socket: Option<Socket>,
}

impl StreamTransport {
    /// Create a disconnected transport for the given endpoint.
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket: None,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn open(&self) -> Result<Socket> {
        match &self.endpoint {
            Endpoint::Tcp(addr) => {
                let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| TransportError::ConnectTimeout {
                        endpoint: self.endpoint.to_string(),
                        timeout: self.connect_timeout,
                    })?
                    .map_err(|e| TransportError::ConnectFailed {
                        endpoint: self.endpoint.to_string(),
                        source: e,
                    })?;
                Ok(Socket::Tcp(Framed::new(stream, FrameCodec)))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = timeout(self.connect_timeout, UnixStream::connect(path))
                    .await
                    .map_err(|_| TransportError::ConnectTimeout {
                        endpoint: self.endpoint.to_string(),
                        timeout: self.connect_timeout,
                    })?
                    .map_err(|e| TransportError::ConnectFailed {
                        endpoint: self.endpoint.to_string(),
                        source: e,
                    })?;
                Ok(Socket::Unix(Framed::new(stream, FrameCodec)))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                Err(TransportError::InvalidEndpoint(self.endpoint.to_string()).into())
            }
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.socket.is_none() {
            self.socket = Some(self.open().await?);
            debug!(endpoint = %self.endpoint, "stream transport connected");
        }
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.connect().await?;
        match self.socket.as_mut() {
            Some(socket) => socket.send(frame).await,
            None => Err(TransportError::Closed.into()),
        }
    }

    async fn recv(&mut self) -> Result<Frame> {
        self.connect().await?;
        match self.socket.as_mut() {
            Some(socket) => socket.recv().await,
            None => Err(TransportError::Closed.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut socket) = self.socket.take() {
            socket.close().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}
