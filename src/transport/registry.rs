use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::completion::ResponseCompletion;
use super::error::TransportError;
use crate::message::Message;

/// Correlation table for outstanding requests, keyed by message id.
///
/// Insertion happens before the bytes leave the encoder; lookup happens on
/// every inbound response frame. The entry is removed before the completion
/// resolves, so user listeners never observe a stale entry.
pub struct PendingRegistry {
    entries: Arc<DashMap<u32, ResponseCompletion>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Registers a completion for reply correlation.
    ///
    /// A message id already in flight is rejected; ids are unique for the
    /// lifetime of their completion. A cancel hook is installed so an
    /// externally cancelled completion evicts its own entry.
    pub fn register(&self, completion: &ResponseCompletion) -> Result<(), TransportError> {
        let id = completion.message_id();
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TransportError::ChannelCreation(
                format!("message id {:#x} already in flight", id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(completion.clone());
                Ok(())
            }
        }?;

        let entries = Arc::clone(&self.entries);
        completion.add_cancel_hook(move || {
            entries.remove(&id);
        });
        // Lost race: cancelled between insert and hook installation.
        if completion.is_complete() {
            self.entries.remove(&id);
        }
        Ok(())
    }

    /// Correlates an inbound response: removes the entry atomically, then
    /// resolves the completion. Returns `false` for unknown ids.
    pub fn complete(&self, reply: Message) -> bool {
        match self.entries.remove(&reply.message_id) {
            Some((_, completion)) => {
                completion.succeed(Some(reply));
                true
            }
            None => {
                debug!(message_id = reply.message_id, "reply for unknown request");
                false
            }
        }
    }

    /// Drops an entry without touching its completion. Failure paths call
    /// this first so the entry is gone before listeners run.
    pub fn remove(&self, message_id: u32) {
        self.entries.remove(&message_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails every outstanding request; used on node shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<u32> = self.entries.iter().map(|e| *e.key()).collect();
        if !ids.is_empty() {
            warn!(pending = ids.len(), "failing in-flight requests on shutdown");
        }
        for id in ids {
            if let Some((_, completion)) = self.entries.remove(&id) {
                completion.fail(TransportError::Shutdown);
            }
        }
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded cache of reverse-connection originals.
///
/// A message sent via RCON waits here, keyed by its id, until the
/// unreachable peer dials back and the dispatcher hands it to the new
/// channel. Least-recently inserted entries are evicted once the cache is
/// full; eviction cancels the orphaned completion so its caller does not
/// hang.
pub struct RconCache {
    capacity: usize,
    inner: Mutex<RconCacheInner>,
}

struct RconCacheInner {
    map: HashMap<u32, ResponseCompletion>,
    order: VecDeque<u32>,
}

impl RconCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(RconCacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn insert(&self, completion: ResponseCompletion) {
        let id = completion.message_id();
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.map.insert(id, completion).is_none() {
                inner.order.push_back(id);
            }
            if inner.map.len() > self.capacity {
                inner
                    .order
                    .pop_front()
                    .and_then(|old| inner.map.remove(&old))
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            warn!(
                message_id = old.message_id(),
                "reverse-connection cache full, dropping oldest pending request"
            );
            old.cancel();
        }
    }

    /// Empties the cache; used on node shutdown.
    pub fn drain(&self) -> Vec<ResponseCompletion> {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.map.drain().map(|(_, completion)| completion).collect()
    }

    /// Removes and returns the cached original for `message_id`.
    pub fn take(&self, message_id: u32) -> Option<ResponseCompletion> {
        let mut inner = self.inner.lock();
        let completion = inner.map.remove(&message_id)?;
        inner.order.retain(|id| *id != message_id);
        Some(completion)
    }

    pub fn remove(&self, message_id: u32) {
        self.take(message_id);
    }

    pub fn contains(&self, message_id: u32) -> bool {
        self.inner.lock().map.contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}
