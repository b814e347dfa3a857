//! Pending-call table.
//!
//! Each channel owns one table mapping in-flight correlation ids to the
//! oneshot that delivers the outcome. A call is registered before its
//! request envelope is handed to the writer, so a response can never
//! race past its waiter. Closing the channel drains the table, failing
//! every waiter with `ChannelClosed`.

use std::collections::HashMap;

use codelink_protocol::{CorrelationId, RpcError};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Debug, Default)]
pub struct PendingCalls {
    inner: Mutex<HashMap<CorrelationId, Waiter>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        PendingCalls::default()
    }

    /// Register a waiter for `id` and return the receiving end. Ids are
    /// minted fresh per call, so a collision means an id was reused
    /// while still in flight.
    pub async fn register(&self, id: CorrelationId) -> oneshot::Receiver<Result<Value, RpcError>> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().await.insert(id, tx);
        debug_assert!(previous.is_none(), "correlation id reused while in flight");
        rx
    }

    /// Deliver an outcome to the waiter for `id`. Returns false when no
    /// waiter exists (already resolved, timed out, or never ours).
    pub async fn resolve(&self, id: &CorrelationId, outcome: Result<Value, RpcError>) -> bool {
        let waiter = self.inner.lock().await.remove(id);
        match waiter {
            Some(tx) => {
                // the caller may have stopped waiting; that is fine
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the waiter for `id` without delivering anything. Used after
    /// a local timeout so a late response finds nothing to resolve.
    pub async fn forget(&self, id: &CorrelationId) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }

    /// Fail every pending call with `error`. Returns how many were
    /// drained.
    pub async fn drain(&self, error: RpcError) -> usize {
        let waiters: Vec<Waiter> = {
            let mut inner = self.inner.lock().await;
            inner.drain().map(|(_, tx)| tx).collect()
        };
        let count = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
