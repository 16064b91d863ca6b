//! Process-wide client factory.
//!
//! A lazily-constructed singleton. Construction is an explicit three-phase
//! state machine (uninitialized, initializing, ready) driven by a single
//! compare-and-set on a process-wide phase word: exactly one caller builds,
//! everyone else either takes the hot path or waits without spinning, and no
//! caller ever observes a half-built instance. A failed build rolls the
//! phase back so a later caller can retry.

use crate::bitmap::{Bitmap, RpcHandle};
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::pool::{DispatcherPool, PoolConfig};
use crate::transport::RuntimeContext;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::debug;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

static PHASE: AtomicU8 = AtomicU8::new(UNINITIALIZED);
static INSTANCE: OnceCell<ClientFactory> = OnceCell::new();

const WAIT_STEP: Duration = Duration::from_millis(10);
const WAIT_ATTEMPTS: u32 = 500;

/// The process-wide entry point for obtaining bitmap handles.
pub struct ClientFactory {
    config: ClientConfig,
    pool: tokio::sync::OnceCell<DispatcherPool>,
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ClientFactory {
    /// The singleton instance, built from [`ClientConfig::from_env`] by the
    /// first caller.
    pub async fn instance() -> Result<&'static Self> {
        Self::init_with(async { ClientConfig::from_env() }).await
    }

    /// The singleton instance, built from an explicit configuration. The
    /// configuration only takes effect for the caller that wins the build;
    /// once the factory is ready it is returned as-is.
    pub async fn instance_with(config: ClientConfig) -> Result<&'static Self> {
        Self::init_with(async move { Ok(config) }).await
    }

    /// Shorthand for `instance().await?.get().await`.
    pub async fn make() -> Result<Bitmap> {
        Self::instance().await?.get().await
    }

    async fn init_with<F>(make: F) -> Result<&'static Self>
    where
        F: Future<Output = Result<ClientConfig>>,
    {
        // Hot path: no synchronization beyond one atomic load once ready.
        if PHASE.load(Ordering::Acquire) == READY {
            return ready_instance();
        }

        match PHASE.compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => match make.await {
                Ok(config) => {
                    debug!("client factory initialized");
                    let _ = INSTANCE.set(Self {
                        config,
                        pool: tokio::sync::OnceCell::new(),
                    });
                    PHASE.store(READY, Ordering::Release);
                    ready_instance()
                }
                Err(e) => {
                    // Roll back so a later caller can retry the build.
                    PHASE.store(UNINITIALIZED, Ordering::Release);
                    Err(e)
                }
            },
            Err(_) => wait_ready().await,
        }
    }

    /// The configuration the factory was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Hand out a handle to a freshly allocated remote bitmap, dispatched
    /// according to the execution context at call time: pooled under a
    /// cooperative scheduler, a dedicated blocking dispatcher otherwise.
    /// Construction context and call context may differ, so the probe
    /// happens here and not at build time.
    pub async fn get(&self) -> Result<Bitmap> {
        Bitmap::create(self.rpc_handle().await?).await
    }

    /// The dispatch channel for the current execution context.
    pub async fn rpc_handle(&self) -> Result<RpcHandle> {
        match RuntimeContext::current() {
            RuntimeContext::Cooperative => {
                let pool = self
                    .pool
                    .get_or_init(|| async {
                        DispatcherPool::new(
                            self.config.endpoint.clone(),
                            PoolConfig {
                                size: self.config.pool_size,
                                heartbeat_interval: self.config.heartbeat_interval,
                            },
                        )
                    })
                    .await;
                Ok(RpcHandle::Pooled(pool.clone()))
            }
            RuntimeContext::Blocking => {
                let dispatcher =
                    Dispatcher::connect(&self.config.endpoint, RuntimeContext::Blocking).await?;
                Ok(RpcHandle::direct(dispatcher))
            }
        }
    }
}

fn ready_instance() -> Result<&'static ClientFactory> {
    INSTANCE.get().ok_or(Error::InitFailed)
}

/// Wait for a concurrent initializer, suspending rather than spinning:
/// a scheduler-aware sleep under a cooperative scheduler, a short thread
/// sleep otherwise. Bails out early if the builder fails, and gives up with
/// a distinct timeout once the budget is spent.
async fn wait_ready() -> Result<&'static ClientFactory> {
    let ctx = RuntimeContext::current();
    for _ in 0..WAIT_ATTEMPTS {
        match PHASE.load(Ordering::Acquire) {
            READY => return ready_instance(),
            UNINITIALIZED => return Err(Error::InitFailed),
            _ => match ctx {
                RuntimeContext::Cooperative => tokio::time::sleep(WAIT_STEP).await,
                RuntimeContext::Blocking => std::thread::sleep(WAIT_STEP),
            },
        }
    }
    Err(Error::InitTimeout(WAIT_STEP * WAIT_ATTEMPTS))
}
