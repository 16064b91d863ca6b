//! Client for a remote roaring-bitmap service over a framed binary RPC
//! protocol.
//!
//! The bitmap engine lives in an external service process; this crate is the
//! transport core that talks to it: the dual-size prefixed wire format, the
//! session handshake with id continuity across reconnects, a call dispatcher
//! with an at-most-one reconnect-and-retry policy, a fixed-size dispatcher
//! pool with background health checks, and a process-wide factory that picks
//! pooled or direct dispatch from the ambient execution context.
//!
//! # Example
//!
//! ```no_run
//! use bitmap_rpc::ClientFactory;
//!
//! async fn example() -> bitmap_rpc::Result<()> {
//!     let bitmap = ClientFactory::make().await?;
//!     bitmap.add_many(&[1, 2, 3]).await?;
//!     assert_eq!(bitmap.cardinality().await?, 3);
//!     bitmap.destruct().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bitmap;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use bitmap::{Bitmap, RpcHandle};
pub use config::ClientConfig;
pub use dispatcher::{Dispatcher, RemoteId};
pub use error::{Error, FrameError, Result, TransportError};
pub use factory::ClientFactory;
pub use pool::{DispatcherPool, Lease, PoolConfig};
pub use protocol::{Frame, FrameCodec, FrameFlags};
pub use session::Session;
pub use transport::{BlockingTransport, Endpoint, RuntimeContext, StreamTransport, Transport};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
pub use serde_json::Value;
