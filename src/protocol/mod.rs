//! Wire protocol: framing and the RPC envelope.

pub mod frame;

pub use frame::{Frame, FrameCodec, FrameFlags, MAX_FRAME_SIZE, PREFIX_SIZE};
