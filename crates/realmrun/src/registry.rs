//! # Registries
//!
//! Id-keyed tables owned by one bridge. Ids come from a per-table counter,
//! start at 1 and are never reused, so a stale id can only miss.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::oneshot;

use realmrpc::RefId;
use realmrpc::Reply;
use realmrpc::ReqId;

use crate::capability::Capability;
use crate::function::Function;

/// Objects handed across the boundary, by the id they were given.
pub struct Registry<T> {
    entries: DashMap<RefId, T>,
    next_id: AtomicU64,
}

/// Host: capabilities the guest holds remote ids for.
pub type InstanceRegistry = Registry<Capability>;

/// Guest: functions the host holds callback ids for.
pub type CallbackRegistry = Registry<Function>;

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self { entries: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    /// Stores `value` under a fresh id.
    pub fn register(&self, value: T) -> RefId {
        let id = RefId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(id, value);
        id
    }

    pub fn get(&self, id: RefId) -> Option<T> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Removes `id`. Releasing an unknown id is a no-op.
    pub fn release(&self, id: RefId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding requests awaiting a reply, keyed by request id.
pub struct Pending {
    waiting: DashMap<ReqId, oneshot::Sender<Reply>>,
    next_id: AtomicU64,
}

impl Pending {
    pub fn new() -> Self {
        Self { waiting: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    /// Allocates a request id and the receiver its reply will land on.
    pub fn register(&self) -> (ReqId, oneshot::Receiver<Reply>) {
        let req_id = ReqId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(req_id, tx);
        (req_id, rx)
    }

    /// Delivers a reply. Returns false for unknown or already settled ids.
    pub fn settle(&self, req_id: ReqId, reply: Reply) -> bool {
        match self.waiting.remove(&req_id) {
            Some((_, tx)) => {
                // The caller may have stopped waiting.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drops a request whose message never made it out.
    pub fn forget(&self, req_id: ReqId) {
        self.waiting.remove(&req_id);
    }

    /// Drops every waiting sender; receivers observe a closed channel.
    pub fn clear(&self) {
        self.waiting.clear();
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

impl Default for Pending {
    fn default() -> Self {
        Self::new()
    }
}
