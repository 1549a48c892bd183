//! Scoped cleanup for containers that have not been handed over yet.

use std::sync::Arc;

use testbed_common::types::ContainerId;

use crate::backend::ContainerRuntime;

/// Kills a container when dropped unless [`disarm`](Self::disarm) was called.
///
/// Guards a container between creation and a successful hand-off, so that
/// cancellation or an early return never leaks a running server.
pub struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: ContainerId,
    armed: bool,
}

impl ContainerGuard {
    /// Arms a guard for `id`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, id: ContainerId) -> Self {
        Self {
            runtime,
            id,
            armed: true,
        }
    }

    /// The guarded container.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Releases the container from the guard's responsibility.
    pub fn disarm(mut self) -> ContainerId {
        self.armed = false;
        self.id.clone()
    }
}

impl std::fmt::Debug for ContainerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerGuard")
            .field("id", &self.id)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = Arc::clone(&self.runtime);
                drop(handle.spawn(async move {
                    if let Err(e) = runtime.kill(id.as_str()).await {
                        tracing::debug!(container = %id, error = %e, "guard kill failed");
                    }
                }));
            }
            Err(_) => {
                tracing::warn!(container = %id, "no async runtime to kill abandoned container");
            }
        }
    }
}
