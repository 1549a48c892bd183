//! Pools of hot servers.
//!
//! Starting a server takes seconds to minutes. A pool starts servers in
//! background tasks ahead of demand so that tests can take one that is
//! already ready. At most `max_hot` servers are starting or waiting at any
//! time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{RunningServer, ServerSpec};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::ServerController;

/// Pause before a warmer retries after a failed start.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Keeps servers of one spec started ahead of demand.
#[derive(Debug)]
pub struct ServerPool {
    controller: Arc<ServerController>,
    hot: tokio::sync::Mutex<mpsc::Receiver<RunningServer>>,
    hot_count: Arc<AtomicUsize>,
    warmers: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerPool {
    /// Starts `max_hot` background warmers for `spec`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a config error if `max_hot` is zero.
    pub fn start(controller: Arc<ServerController>, spec: ServerSpec, max_hot: usize) -> Result<Self> {
        if max_hot == 0 {
            return Err(TestbedError::Config {
                message: "a server pool needs room for at least one server".into(),
            });
        }
        let (sender, receiver) = mpsc::channel(max_hot);
        let hot_count = Arc::new(AtomicUsize::new(0));
        let warmers = (0..max_hot)
            .map(|_| {
                tokio::spawn(warm(
                    Arc::clone(&controller),
                    spec.clone(),
                    sender.clone(),
                    Arc::clone(&hot_count),
                ))
            })
            .collect();
        tracing::info!(max_hot, image = spec.image(), "server pool started");

        Ok(Self {
            controller,
            hot: tokio::sync::Mutex::new(receiver),
            hot_count,
            warmers: Mutex::new(warmers),
        })
    }

    /// Number of ready servers waiting to be taken.
    #[must_use]
    pub fn hot_servers(&self) -> usize {
        self.hot_count.load(Ordering::SeqCst)
    }

    /// Waits for a ready server and takes ownership of it. Its slot is
    /// refilled in the background.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if the pool has been stopped.
    pub async fn take(&self) -> Result<RunningServer> {
        let server = self.hot.lock().await.recv().await.ok_or_else(|| {
            TestbedError::InvalidState {
                message: "server pool has been stopped".into(),
            }
        })?;
        let _ = self.hot_count.fetch_sub(1, Ordering::SeqCst);
        Ok(server)
    }

    /// Stops the warmers and every server not yet taken. Servers still
    /// starting are killed by their start guards. Idempotent.
    pub async fn stop(&self) {
        for warmer in self.drain_warmers() {
            warmer.abort();
        }
        let mut hot = self.hot.lock().await;
        hot.close();
        while let Some(server) = hot.recv().await {
            let _ = self.hot_count.fetch_sub(1, Ordering::SeqCst);
            self.controller.stop_server(&server).await;
        }
    }

    fn drain_warmers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.warmers.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for ServerPool {
    fn drop(&mut self) {
        for warmer in self.drain_warmers() {
            warmer.abort();
        }
        let left = self.hot_servers();
        if left > 0 {
            tracing::warn!(left, "server pool dropped without stop; hot servers left running");
        }
    }
}

async fn warm(
    controller: Arc<ServerController>,
    spec: ServerSpec,
    sender: mpsc::Sender<RunningServer>,
    hot_count: Arc<AtomicUsize>,
) {
    loop {
        let Ok(slot) = sender.reserve().await else {
            return;
        };
        match controller.start_server(&spec).await {
            Ok(server) => {
                let _ = hot_count.fetch_add(1, Ordering::SeqCst);
                slot.send(server);
            }
            Err(e) => {
                drop(slot);
                tracing::warn!(error = %e, "pool could not start a server");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
