//! Correlation tables for relay responses that carry no request id.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PendingKeyRequests   target ──► (request_id, oneshot)                  │
//! │                       one waiter per target, newest wins               │
//! │                                                                         │
//! │  PendingDeliveries    to ──► [oneshot, oneshot, …]                      │
//! │                       statuses for the same target resolve in order    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::relay_client::DeliveryStatus;
use crate::crypto::EncodedPublicKey;

type KeySender = oneshot::Sender<Option<EncodedPublicKey>>;

/// Outstanding `requestPublicKey` calls, keyed by target.
#[derive(Default)]
pub struct PendingKeyRequests {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<String, (u64, KeySender)>>,
}

impl PendingKeyRequests {
    /// Register a waiter for `target`. A previous waiter for the same target
    /// is dropped, which fails its receiver.
    pub fn register(&self, target: &str) -> (u64, oneshot::Receiver<Option<EncodedPublicKey>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if let Some((previous, _)) = self.waiting.lock().insert(target.to_string(), (id, tx)) {
            tracing::debug!(target_user = target, superseded = previous, "Superseded pending peer key request");
        }

        (id, rx)
    }

    /// Hand a response to the waiter for `target`. Returns whether anyone
    /// was still waiting.
    pub fn resolve(&self, target: &str, key: Option<EncodedPublicKey>) -> bool {
        let entry = self.waiting.lock().remove(target);
        match entry {
            Some((_, tx)) => tx.send(key).is_ok(),
            None => false,
        }
    }

    /// Remove the waiter for `target` only if it is still request `id`.
    pub fn cancel(&self, target: &str, id: u64) -> bool {
        let mut waiting = self.waiting.lock();
        match waiting.get(target) {
            Some((current, _)) if *current == id => {
                waiting.remove(target);
                true
            }
            _ => false,
        }
    }

    /// Number of targets with an outstanding request.
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outstanding `sendMessage` calls awaiting a `deliveryStatus`.
#[derive(Default)]
pub struct PendingDeliveries {
    waiting: Mutex<HashMap<String, VecDeque<oneshot::Sender<DeliveryStatus>>>>,
}

impl PendingDeliveries {
    /// Queue a waiter for the next status addressed to `to`.
    pub fn register(&self, to: &str) -> oneshot::Receiver<DeliveryStatus> {
        let (tx, rx) = oneshot::channel();
        self.waiting
            .lock()
            .entry(to.to_string())
            .or_default()
            .push_back(tx);
        rx
    }

    /// Resolve the oldest waiter for `status.to`.
    ///
    /// A waiter that already timed out still consumes its status, keeping
    /// later statuses aligned with later sends.
    pub fn resolve(&self, status: DeliveryStatus) -> bool {
        let sender = {
            let mut waiting = self.waiting.lock();
            let Some(queue) = waiting.get_mut(&status.to) else {
                return false;
            };
            let sender = queue.pop_front();
            if queue.is_empty() {
                waiting.remove(&status.to);
            }
            sender
        };

        match sender {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    /// Drop the most recent waiter for `to`, for a send that never left.
    pub fn cancel_latest(&self, to: &str) -> bool {
        let mut waiting = self.waiting.lock();
        let Some(queue) = waiting.get_mut(to) else {
            return false;
        };
        let removed = queue.pop_back().is_some();
        if queue.is_empty() {
            waiting.remove(to);
        }
        removed
    }

    /// Number of sends still awaiting a status.
    pub fn len(&self) -> usize {
        self.waiting.lock().values().map(VecDeque::len).sum()
    }

    /// Whether no send is awaiting a status.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
