//! Named RPC calls with an at-most-one reconnect-and-retry policy.

use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameFlags};
use crate::session::Session;
use crate::transport::{self, Endpoint, RuntimeContext};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// Reserved liveness method; the server must echo [`PONG`].
pub const PING_METHOD: &str = "Service.Ping";
const PING: &str = "ping";
const PONG: &str = "pong";

/// Server-side identity of a remote bitmap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteId {
    /// The session that created the object.
    #[serde(rename = "connectionID")]
    pub connection_id: u32,
    /// Object id within that session.
    #[serde(rename = "objectID")]
    pub object_id: u32,
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    m: &'a str,
    p: &'a Value,
}

/// A session plus the call/retry logic bound to it.
///
/// Calls on one dispatcher are strictly ordered: it owns exactly one
/// connection and keeps at most one request in flight.
pub struct Dispatcher {
    session: Session,
}

impl Dispatcher {
    /// Connect and handshake a fresh dispatcher for the given execution
    /// context.
    pub async fn connect(endpoint: &Endpoint, ctx: RuntimeContext) -> Result<Self> {
        let transport = transport::for_context(endpoint.clone(), ctx);
        let session = Session::establish(transport).await?;
        Ok(Self { session })
    }

    /// Wrap an established session.
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }

    /// The session id this dispatcher is operating under.
    #[must_use]
    pub const fn session_id(&self) -> u32 {
        self.session.id()
    }

    /// Issue a named RPC call.
    ///
    /// A transport-level failure (reset, truncated or corrupt frame) gets
    /// exactly one reconnect-and-retry; a second failure is surfaced as
    /// [`Error::ReconnectFailed`] without further attempts, bounding the
    /// worst-case latency of a call against a dead server. A response frame
    /// flagged as an error is a successful round trip and is never retried.
    pub async fn call(&mut self, method: &str, payload: &Value) -> Result<Value> {
        match self.round_trip(method, payload).await {
            Err(e) if e.is_transport() => {
                debug!(method, error = %e, "transport failure, reconnecting once");
                self.session.reconnect().await.map_err(|e| match e {
                    expired @ Error::SessionExpired { .. } => expired,
                    other => Error::reconnect_failed(other),
                })?;
                self.round_trip(method, payload).await.map_err(|e| {
                    if e.is_transport() {
                        Error::reconnect_failed(e)
                    } else {
                        e
                    }
                })
            }
            outcome => outcome,
        }
    }

    async fn round_trip(&mut self, method: &str, payload: &Value) -> Result<Value> {
        let body = serde_json::to_vec(&RequestEnvelope { m: method, p: payload })?;
        self.session.send(Frame::new(FrameFlags::NONE, body)).await?;

        let reply = self.session.recv().await?;
        if reply.is_error() {
            let message = reply
                .payload
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            return Err(Error::Remote(message));
        }
        match reply.payload {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Value::Null),
        }
    }

    /// Allocate a fresh bitmap object on the server and return its identity.
    pub async fn new_object(&mut self) -> Result<RemoteId> {
        let connection_id = self.session.id();
        let result = self.call("Service.New", &json!(connection_id)).await?;
        let object_id = serde_json::from_value(result)?;
        Ok(RemoteId {
            connection_id,
            object_id,
        })
    }

    /// Liveness probe per the heartbeat convention.
    pub async fn ping(&mut self) -> Result<bool> {
        let reply = self.call(PING_METHOD, &json!(PING)).await?;
        Ok(reply == json!(PONG))
    }

    /// Close the underlying connection.
    pub async fn close(mut self) -> Result<()> {
        self.session.close().await
    }
}
