//! Handles to bitmap objects living on the server.
//!
//! Every operation here is a pass-through RPC call: the payload shapes
//! mirror the server's service signatures and nothing is interpreted
//! client-side beyond packing arguments and unpacking the result value.

use crate::dispatcher::{Dispatcher, PING_METHOD, RemoteId};
use crate::error::Result;
use crate::pool::DispatcherPool;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where a handle sends its calls.
#[derive(Clone)]
pub enum RpcHandle {
    /// Calls borrow a dispatcher from a shared pool.
    Pooled(DispatcherPool),
    /// Calls go through one dedicated dispatcher.
    Direct(Arc<Mutex<Dispatcher>>),
}

impl RpcHandle {
    /// Wrap a dedicated dispatcher.
    #[must_use]
    pub fn direct(dispatcher: Dispatcher) -> Self {
        Self::Direct(Arc::new(Mutex::new(dispatcher)))
    }

    /// Issue a named call through whichever dispatch this handle carries.
    pub async fn call(&self, method: &str, payload: &Value) -> Result<Value> {
        match self {
            Self::Pooled(pool) => pool.call(method, payload).await,
            Self::Direct(dispatcher) => dispatcher.lock().await.call(method, payload).await,
        }
    }

    async fn new_object(&self) -> Result<RemoteId> {
        match self {
            Self::Pooled(pool) => pool.new_object().await,
            Self::Direct(dispatcher) => dispatcher.lock().await.new_object().await,
        }
    }
}

fn value_payload(id: RemoteId, value: impl Into<Value>) -> Value {
    json!({ "id": id, "value": value.into() })
}

fn pair_payload(current: RemoteId, target: RemoteId) -> Value {
    json!({ "currentID": current, "targetID": target })
}

/// A handle to one remote bitmap object.
pub struct Bitmap {
    id: RemoteId,
    rpc: RpcHandle,
}

impl Bitmap {
    /// Allocate a fresh bitmap on the server, reachable through `rpc`.
    pub async fn create(rpc: RpcHandle) -> Result<Self> {
        let id = rpc.new_object().await?;
        Ok(Self { id, rpc })
    }

    /// The server-side identity of this bitmap.
    #[must_use]
    pub const fn id(&self) -> RemoteId {
        self.id
    }

    async fn op<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let value = self.rpc.call(method, &payload).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn op_unit(&self, method: &str, payload: Value) -> Result<()> {
        self.rpc.call(method, &payload).await?;
        Ok(())
    }

    /// Liveness probe against the service.
    pub async fn ping(&self) -> Result<bool> {
        Ok(self.rpc.call(PING_METHOD, &json!("ping")).await? == json!("pong"))
    }

    /// Add `x` to the bitmap.
    pub async fn add(&self, x: u32) -> Result<()> {
        self.op_unit("Service.Add", value_payload(self.id, x)).await
    }

    /// Add `x`, reporting whether it was newly added.
    pub async fn checked_add(&self, x: u32) -> Result<bool> {
        self.op("Service.CheckedAdd", value_payload(self.id, x))
            .await
    }

    /// Add every value in `xs`.
    pub async fn add_many(&self, xs: &[u32]) -> Result<()> {
        self.op_unit("Service.AddMany", value_payload(self.id, xs.to_vec()))
            .await
    }

    /// Add the integers in `[range_start, range_end)`.
    pub async fn add_range(&self, range_start: u32, range_end: u32) -> Result<()> {
        self.op_unit(
            "Service.AddRange",
            value_payload(self.id, vec![range_start, range_end]),
        )
        .await
    }

    /// Remove `x` from the bitmap.
    pub async fn remove(&self, x: u32) -> Result<()> {
        self.op_unit("Service.Remove", value_payload(self.id, x))
            .await
    }

    /// Remove `x`, reporting whether it was present.
    pub async fn checked_remove(&self, x: u32) -> Result<bool> {
        self.op("Service.CheckedRemove", value_payload(self.id, x))
            .await
    }

    /// Remove every value in `xs`.
    pub async fn remove_many(&self, xs: &[u32]) -> Result<()> {
        self.op_unit("Service.RemoveMany", value_payload(self.id, xs.to_vec()))
            .await
    }

    /// Remove the integers in `[range_start, range_end)`.
    pub async fn remove_range(&self, range_start: u32, range_end: u32) -> Result<()> {
        self.op_unit(
            "Service.RemoveRange",
            value_payload(self.id, vec![range_start, range_end]),
        )
        .await
    }

    /// Negate the bits in `[range_start, range_end)`.
    pub async fn flip(&self, range_start: u32, range_end: u32) -> Result<()> {
        self.op_unit(
            "Service.Flip",
            value_payload(self.id, vec![range_start, range_end]),
        )
        .await
    }

    /// Whether `x` is in the bitmap.
    pub async fn contains(&self, x: u32) -> Result<bool> {
        self.op("Service.Contains", value_payload(self.id, x)).await
    }

    /// Number of integers smaller than or equal to `x`.
    pub async fn rank(&self, x: u32) -> Result<u64> {
        self.op("Service.Rank", value_payload(self.id, x)).await
    }

    /// The integer at `position` in sorted order, zero-based.
    pub async fn select(&self, position: u32) -> Result<i64> {
        self.op("Service.Select", value_payload(self.id, position))
            .await
    }

    /// The smallest value in the bitmap.
    pub async fn minimum(&self) -> Result<u32> {
        self.op("Service.Minimum", json!(self.id)).await
    }

    /// The largest value in the bitmap.
    pub async fn maximum(&self) -> Result<u32> {
        self.op("Service.Maximum", json!(self.id)).await
    }

    /// Number of integers in the bitmap.
    pub async fn cardinality(&self) -> Result<u64> {
        self.op("Service.GetCardinality", json!(self.id)).await
    }

    /// Cardinality of the intersection with `other`; neither is modified.
    pub async fn and_cardinality(&self, other: &Self) -> Result<u64> {
        self.op("Service.AndCardinality", pair_payload(self.id, other.id))
            .await
    }

    /// Cardinality of the union with `other`; neither is modified.
    pub async fn or_cardinality(&self, other: &Self) -> Result<u64> {
        self.op("Service.OrCardinality", pair_payload(self.id, other.id))
            .await
    }

    /// Whether the bitmap holds no values.
    pub async fn is_empty(&self) -> Result<bool> {
        self.op("Service.IsEmpty", json!(self.id)).await
    }

    /// Remove every value.
    pub async fn clear(&self) -> Result<()> {
        self.op_unit("Service.Clear", json!(self.id)).await
    }

    /// All values in sorted order.
    pub async fn to_array(&self) -> Result<Vec<u32>> {
        self.op("Service.ToArray", json!(self.id)).await
    }

    /// Serialize the bitmap to base64.
    pub async fn to_base64(&self) -> Result<String> {
        self.op("Service.ToBase64", json!(self.id)).await
    }

    /// Replace the bitmap's contents from a base64 serialization, returning
    /// the number of bytes consumed.
    pub async fn from_base64(&self, b64: &str) -> Result<i64> {
        self.op("Service.FromBase64", value_payload(self.id, b64))
            .await
    }

    /// Intersect in place with `other`.
    pub async fn and(&self, other: &Self) -> Result<()> {
        self.op_unit("Service.And", pair_payload(self.id, other.id))
            .await
    }

    /// Union in place with `other`.
    pub async fn or(&self, other: &Self) -> Result<()> {
        self.op_unit("Service.Or", pair_payload(self.id, other.id))
            .await
    }

    /// Symmetric difference in place with `other`.
    pub async fn xor(&self, other: &Self) -> Result<()> {
        self.op_unit("Service.Xor", pair_payload(self.id, other.id))
            .await
    }

    /// Difference in place with `other`.
    pub async fn and_not(&self, other: &Self) -> Result<()> {
        self.op_unit("Service.AndNot", pair_payload(self.id, other.id))
            .await
    }

    /// Whether the intersection with `other` is non-empty.
    pub async fn intersects(&self, other: &Self) -> Result<bool> {
        self.op("Service.Intersects", pair_payload(self.id, other.id))
            .await
    }

    /// Whether both bitmaps hold the same values.
    pub async fn equals(&self, other: &Self) -> Result<bool> {
        self.op("Service.Equals", pair_payload(self.id, other.id))
            .await
    }

    /// Compact the bitmap's internal representation.
    pub async fn run_optimize(&self) -> Result<()> {
        self.op_unit("Service.RunOptimize", json!(self.id)).await
    }

    /// Release the server-side object backing this handle. Without this the
    /// object lives until the server garbage-collects the session.
    pub async fn destruct(self) -> Result<()> {
        self.op_unit("Service.Destruct", json!(self.id)).await
    }
}
