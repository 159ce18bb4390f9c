//! Shared, reconnecting handle to the audit store
//!
//! State machine: Disconnected -> Connecting -> Connected. The connect loop
//! retries with a fixed delay until a store is established and runs
//! independently of message processing; callers that find the handle empty
//! skip their write. Once connected the handle stays connected: the pool
//! re-establishes dropped connections itself and failed writes are reported
//! by the audit logger.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tb_common::ConnectionState;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{AuditStore, Result};

#[derive(Default)]
pub struct StoreHandle {
    store: RwLock<Option<Arc<dyn AuditStore>>>,
    state: RwLock<ConnectionState>,
}

impl StoreHandle {
    /// An empty handle, waiting for a connection
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is already connected to `store`
    pub fn connected(store: Arc<dyn AuditStore>) -> Self {
        let handle = Self::new();
        handle.set_store(store);
        handle
    }

    /// The store, if a connection is currently established
    pub fn current(&self) -> Option<Arc<dyn AuditStore>> {
        if *self.state.read() != ConnectionState::Connected {
            return None;
        }
        self.store.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn set_store(&self, store: Arc<dyn AuditStore>) {
        *self.store.write() = Some(store);
        *self.state.write() = ConnectionState::Connected;
    }

    /// Connect in the background, retrying every `retry_delay` until
    /// `connector` succeeds or shutdown is signalled.
    pub fn spawn_connect_loop<F, Fut>(
        self: &Arc<Self>,
        connector: F,
        retry_delay: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn AuditStore>>> + Send + 'static,
    {
        let handle = Arc::clone(self);

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                *handle.state.write() = ConnectionState::Connecting;

                match connector().await {
                    Ok(store) => {
                        handle.set_store(store);
                        info!(attempt, "Audit store connected");
                        return;
                    }
                    Err(e) => {
                        *handle.state.write() = ConnectionState::Disconnected;
                        error!(
                            attempt,
                            error = %e,
                            retry_in_secs = retry_delay.as_secs_f64(),
                            "Audit store connection failed"
                        );
                    }
                }

                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Audit store connect loop stopped");
                        return;
                    }
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        })
    }
}
