//! Fixed-size dispatcher pool with a background heartbeat.
//!
//! The pool owns up to N dispatchers. A slot is either checked out by
//! exactly one caller (a live [`Lease`]) or free; the semaphore permit
//! travels inside the lease, so every borrow is paired with exactly one
//! return on every code path, including panics and early errors.

use crate::dispatcher::{Dispatcher, RemoteId};
use crate::error::{Error, Result};
use crate::transport::{Endpoint, RuntimeContext};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, warn};

/// Default number of dispatchers in a pool.
pub const DEFAULT_POOL_SIZE: usize = 32;

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of dispatchers, fixed at construction.
    pub size: usize,
    /// Interval between heartbeat sweeps.
    pub heartbeat_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

struct PoolInner {
    endpoint: Endpoint,
    size: usize,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<Dispatcher>>,
    shutdown: watch::Sender<bool>,
}

/// A fixed set of dispatchers shared among concurrent callers.
///
/// Cloning is cheap and shares the same pool. Must be created inside a
/// tokio runtime; the heartbeat task is spawned at construction.
#[derive(Clone)]
pub struct DispatcherPool {
    inner: Arc<PoolInner>,
}

impl DispatcherPool {
    /// Create a pool. Dispatchers are built lazily: the first heartbeat
    /// sweep fills the pool, and `get` builds a replacement whenever a slot
    /// is free but empty.
    #[must_use]
    pub fn new(endpoint: Endpoint, config: PoolConfig) -> Self {
        let size = if config.size == 0 {
            DEFAULT_POOL_SIZE
        } else {
            config.size
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(PoolInner {
            endpoint,
            size,
            slots: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(VecDeque::with_capacity(size)),
            shutdown,
        });

        spawn_heartbeat(
            Arc::downgrade(&inner),
            shutdown_rx,
            config.heartbeat_interval,
        );
        Self { inner }
    }

    /// Borrow a dispatcher, suspending cooperatively until a slot frees up.
    ///
    /// Dropping the returned lease returns the dispatcher; calling
    /// [`Lease::discard`] drops it so the slot is rebuilt on a later borrow.
    pub async fn get(&self) -> Result<Lease> {
        let permit = Arc::clone(&self.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        lease_with(&self.inner, permit).await
    }

    /// Borrow a dispatcher, call, and classify the outcome: a dispatcher
    /// that failed its reconnect or lost its session is discarded, anything
    /// else goes back into the pool. The original error propagates either
    /// way.
    pub async fn call(&self, method: &str, payload: &Value) -> Result<Value> {
        let mut lease = self.get().await?;
        match lease.call(method, payload).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if discards(&e) {
                    lease.discard();
                }
                Err(e)
            }
        }
    }

    /// Borrow a dispatcher and allocate a remote bitmap object, with the
    /// same failure classification as [`call`](Self::call).
    pub async fn new_object(&self) -> Result<RemoteId> {
        let mut lease = self.get().await?;
        match lease.new_object().await {
            Ok(id) => Ok(id),
            Err(e) => {
                if discards(&e) {
                    lease.discard();
                }
                Err(e)
            }
        }
    }

    /// Close the pool. Outstanding leases drain; future borrows fail with
    /// [`Error::PoolClosed`] and the heartbeat task exits.
    pub fn close(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.slots.close();
        self.inner.idle.lock().clear();
    }

    /// Whether the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }

    /// The fixed capacity N.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.size
    }

    /// Slots not currently checked out. `capacity - free_slots` is the
    /// number of live leases.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }
}

const fn discards(e: &Error) -> bool {
    matches!(
        e,
        Error::SessionExpired { .. } | Error::ReconnectFailed { .. }
    )
}

async fn lease_with(inner: &Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Result<Lease> {
    let existing = inner.idle.lock().pop_front();
    let dispatcher = match existing {
        Some(dispatcher) => dispatcher,
        // Slot is free but empty (never built, or discarded): build a
        // replacement. On failure the permit drops and frees the slot.
        None => Dispatcher::connect(&inner.endpoint, RuntimeContext::Cooperative).await?,
    };
    Ok(Lease {
        dispatcher: Some(dispatcher),
        pool: Arc::clone(inner),
        _permit: permit,
    })
}

async fn try_lease(inner: &Arc<PoolInner>) -> Result<Option<Lease>> {
    match Arc::clone(&inner.slots).try_acquire_owned() {
        Ok(permit) => lease_with(inner, permit).await.map(Some),
        Err(_) => Ok(None),
    }
}

/// Exclusive ownership of one pooled dispatcher.
///
/// Dereferences to [`Dispatcher`]. The slot is released exactly once, on
/// drop or on [`discard`](Self::discard).
pub struct Lease {
    dispatcher: Option<Dispatcher>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    /// Drop the dispatcher instead of returning it to the pool; the slot is
    /// rebuilt on a later borrow.
    pub fn discard(mut self) {
        self.dispatcher = None;
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

impl Deref for Lease {
    type Target = Dispatcher;

    fn deref(&self) -> &Dispatcher {
        self.dispatcher
            .as_ref()
            .expect("lease dispatcher present until drop")
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Dispatcher {
        self.dispatcher
            .as_mut()
            .expect("lease dispatcher present until drop")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            if !self.pool.slots.is_closed() {
                self.pool.idle.lock().push_back(dispatcher);
            }
        }
        // The permit drops after this, waking one waiting borrower.
    }
}

/// Background liveness sweep.
///
/// Holds only a weak reference: a pool dropped or closed concurrently is
/// observed as a dead reference or a closed semaphore and the task exits
/// instead of operating on freed state. Failures in here are logged and
/// swallowed; a health check must never take the process down.
fn spawn_heartbeat(
    inner: std::sync::Weak<PoolInner>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    debug!("pool shut down, heartbeat exiting");
                    return;
                }
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.slots.is_closed() {
                debug!("pool closed, heartbeat exiting");
                return;
            }
            sweep(&inner).await;
        }
    });
}

/// Cycle through the pool once: build any missing dispatchers, ping each
/// one, and discard the ones that fail to answer.
///
/// One slot is held at a time. Each lease goes back before the next is
/// taken (pinged dispatchers return to the back of the idle queue, so a
/// full cycle visits every free slot), keeping the rest of the pool
/// available to callers for the whole pass.
async fn sweep(inner: &Arc<PoolInner>) {
    for _ in 0..inner.size {
        let mut lease = match try_lease(inner).await {
            Ok(Some(lease)) => lease,
            Ok(None) => break, // remaining slots are checked out by callers
            Err(e) => {
                warn!(error = %e, "heartbeat could not build pool dispatcher");
                continue;
            }
        };
        match lease.ping().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(session = lease.session_id(), "non-pong heartbeat reply, discarding dispatcher");
                lease.discard();
            }
            Err(e) => {
                warn!(session = lease.session_id(), error = %e, "heartbeat failed, discarding dispatcher");
                lease.discard();
            }
        }
    }
}
