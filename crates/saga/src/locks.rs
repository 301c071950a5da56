//! Per-order locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::OrderId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes read-modify-write cycles on the same order.
///
/// Different orders never contend. A lock entry is dropped once nobody holds
/// or waits for it.
#[derive(Debug, Default)]
pub struct OrderLocks {
    locks: Mutex<HashMap<OrderId, Arc<AsyncMutex<()>>>>,
}

/// Holds the lock of one order until dropped.
pub struct OrderGuard<'a> {
    owner: &'a OrderLocks,
    order_id: OrderId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `order_id`.
    pub async fn lock(&self, order_id: OrderId) -> OrderGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(order_id).or_default())
        };

        OrderGuard {
            owner: self,
            order_id,
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Number of orders with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for OrderGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mutex) = locks.get(&self.order_id)
            && Arc::strong_count(mutex) == 1
        {
            locks.remove(&self.order_id);
        }
    }
}
