//! Per-store operation leases
//!
//! A lease makes provisioning and deletion single-flight per store name. It
//! is taken synchronously when a request is accepted, moved into the
//! background task and released when that task drops it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::store::StoreName;

/// What the lease holder is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Provision,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Provision => write!(f, "provisioning"),
            OperationKind::Delete => write!(f, "deletion"),
        }
    }
}

struct ActiveOp {
    id: u64,
    kind: OperationKind,
    cancel: CancellationToken,
    released: CancellationToken,
    started: bool,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    ops: Mutex<HashMap<StoreName, ActiveOp>>,
}

/// Table of held leases, shared between the API path and background tasks
#[derive(Clone, Default)]
pub struct LeaseTable {
    inner: Arc<Inner>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `name`, or fail with `Conflict` if it is held
    pub fn acquire(&self, name: &StoreName, kind: OperationKind) -> Result<Lease> {
        let mut ops = self.ops();
        if let Some(active) = ops.get(name) {
            return Err(StoreError::conflict(format!(
                "store '{}' has {} in progress",
                name, active.kind
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let released = CancellationToken::new();
        ops.insert(
            name.clone(),
            ActiveOp {
                id,
                kind,
                cancel: cancel.clone(),
                released: released.clone(),
                started: false,
            },
        );

        tracing::debug!(store = %name, lease = id, %kind, "lease acquired");
        Ok(Lease {
            table: self.clone(),
            name: name.clone(),
            id,
            kind,
            cancel,
            released,
        })
    }

    /// Kind of operation currently holding `name`
    pub fn holder(&self, name: &StoreName) -> Option<OperationKind> {
        self.ops().get(name).map(|op| op.kind)
    }

    pub fn is_held(&self, name: &StoreName) -> bool {
        self.ops().contains_key(name)
    }

    /// Cancel the lease holder for `name` and wait until it lets go
    ///
    /// A holder whose task has not started yet is evicted immediately.
    /// Returns `false` if the lease is still held once `grace` elapsed.
    pub async fn cancel_and_wait(&self, name: &StoreName, grace: Duration) -> bool {
        let released = {
            let mut ops = self.ops();
            let Some(active) = ops.get(name) else {
                return true;
            };
            active.cancel.cancel();

            if !active.started {
                if let Some(evicted) = ops.remove(name) {
                    evicted.released.cancel();
                    tracing::debug!(store = %name, lease = evicted.id, "evicted queued lease holder");
                }
                return true;
            }
            active.released.clone()
        };

        tokio::time::timeout(grace, released.cancelled()).await.is_ok()
    }

    /// Wait until nothing holds `name`, without cancelling the holder
    ///
    /// Returns `false` if the name is still held after `timeout`.
    pub async fn wait_released(&self, name: &StoreName, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let released = {
                    let ops = self.ops();
                    match ops.get(name) {
                        Some(active) => active.released.clone(),
                        None => return,
                    }
                };
                released.cancelled().await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    fn ops(&self) -> MutexGuard<'_, HashMap<StoreName, ActiveOp>> {
        self.inner.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held operation lease; dropping it releases the name
pub struct Lease {
    table: LeaseTable,
    name: StoreName,
    id: u64,
    kind: OperationKind,
    cancel: CancellationToken,
    released: CancellationToken,
}

impl Lease {
    pub fn name(&self) -> &StoreName {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Cancellation token observed by the task's suspension points
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Mark the owning task as running
    ///
    /// Returns `false` if the lease was cancelled or evicted while queued, in
    /// which case the task must not touch the record.
    pub fn start(&self) -> bool {
        let mut ops = self.table.ops();
        match ops.get_mut(&self.name) {
            Some(active) if active.id == self.id && !active.cancel.is_cancelled() => {
                active.started = true;
                true
            }
            _ => false,
        }
    }

    /// Whether this lease is still the current, uncancelled holder
    pub fn is_valid(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.table
            .ops()
            .get(&self.name)
            .is_some_and(|active| active.id == self.id)
    }

    /// `is_valid` as a `Result` for use before state-mutating writes
    pub fn check(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StoreError::conflict(format!(
                "{} lease for store '{}' is no longer current",
                self.kind, self.name
            )))
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut ops = self.table.ops();
        if ops.get(&self.name).is_some_and(|active| active.id == self.id) {
            ops.remove(&self.name);
        }
        drop(ops);
        self.released.cancel();
        tracing::debug!(store = %self.name, lease = self.id, "lease released");
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
