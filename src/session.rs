//! Session handshake and reconnection.
//!
//! A session is a transport plus the server-assigned session id. The id is
//! the correlation key the server uses to find this client's bitmap objects
//! across calls and across reconnects: as long as the server keeps echoing
//! the same id back, the remote state created under it is intact.

use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameFlags};
use crate::transport::Transport;
use tracing::debug;

/// A connected transport bound to a server-assigned session id.
pub struct Session {
    transport: Box<dyn Transport>,
    id: u32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open the transport and run the handshake with no prior id.
    pub async fn establish(transport: Box<dyn Transport>) -> Result<Self> {
        Self::establish_as(transport, 0).await
    }

    /// Open the transport and run the handshake announcing a prior id.
    pub async fn establish_as(mut transport: Box<dyn Transport>, last_id: u32) -> Result<Self> {
        let id = handshake(&mut *transport, last_id).await?;
        Ok(Self { transport, id })
    }

    /// The server-assigned session id, always greater than zero.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Drop the current connection, reopen it, and re-run the handshake with
    /// the prior session id.
    ///
    /// The session always adopts the id the server hands back. If that id
    /// differs from the prior one, the server has discarded the old session
    /// and everything created under it: the reconnect reports
    /// [`Error::SessionExpired`] so the caller can decide whether to carry
    /// on against the fresh session instead of silently losing state.
    pub async fn reconnect(&mut self) -> Result<()> {
        let prior = self.id;
        // The connection is already suspect; a close failure changes nothing.
        let _ = self.transport.close().await;
        self.transport.connect().await?;

        let id = handshake(&mut *self.transport, prior).await?;
        self.id = id;
        if id != prior {
            debug!(prior, actual = id, "server discarded session on reconnect");
            return Err(Error::SessionExpired {
                expected: prior,
                actual: id,
            });
        }
        Ok(())
    }

    /// Send one frame on the session's transport.
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        self.transport.send(frame).await
    }

    /// Receive one frame from the session's transport.
    pub async fn recv(&mut self) -> Result<Frame> {
        self.transport.recv().await
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

/// Run the handshake: announce the last-known session id as ASCII decimal
/// (`"0"` when none), discard the server's banner frame, and parse the
/// second frame as the id to use henceforth.
async fn handshake(transport: &mut dyn Transport, last_id: u32) -> Result<u32> {
    transport.connect().await?;
    transport
        .send(Frame::new(FrameFlags::NONE, last_id.to_string()))
        .await?;

    let _banner = transport.recv().await?;
    let reply = transport.recv().await?;

    let text = match &reply.payload {
        Some(payload) => std::str::from_utf8(payload)
            .map_err(|_| Error::Handshake("session id is not valid UTF-8".to_string()))?,
        None => "",
    };
    let id: i64 = text
        .trim()
        .parse()
        .map_err(|_| Error::Handshake(format!("non-numeric session id {text:?}")))?;
    if id <= 0 {
        return Err(Error::Handshake(format!("server issued session id {id}")));
    }
    u32::try_from(id).map_err(|_| Error::Handshake(format!("session id {id} out of range")))
}
