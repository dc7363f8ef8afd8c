use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use super::bloom::BloomFilter;
use crate::peer::{Key, PeerAddress, PeerId};

/// One announced peer under a `(location, domain)` key pair.
#[derive(Debug, Clone)]
pub struct TrackerEntry {
    pub peer: PeerAddress,
    pub data: Bytes,
    stored_at: Instant,
}

impl TrackerEntry {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// TTL'd tracker storage.
///
/// Expired entries are purged lazily on every access of their key pair;
/// re-announcing refreshes the timestamp.
pub struct TrackerStorage {
    ttl: Duration,
    entries: Mutex<HashMap<(Key, Key), HashMap<PeerId, TrackerEntry>>>,
}

impl TrackerStorage {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, location: Key, domain: Key, peer: PeerAddress, data: Bytes) {
        let mut entries = self.entries.lock();
        let slot = entries.entry((location, domain)).or_default();
        Self::purge(slot, self.ttl);
        slot.insert(
            peer.id,
            TrackerEntry {
                peer,
                data,
                stored_at: Instant::now(),
            },
        );
    }

    /// Live entries for a key pair, skipping peer ids the caller already
    /// knows (per the exclusion filter).
    pub fn get(&self, location: Key, domain: Key, exclude: Option<&BloomFilter>) -> Vec<TrackerEntry> {
        let mut entries = self.entries.lock();
        let Some(slot) = entries.get_mut(&(location, domain)) else {
            return Vec::new();
        };
        Self::purge(slot, self.ttl);
        slot.values()
            .filter(|entry| match exclude {
                Some(filter) => !filter.contains(&entry.peer.id),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn contains(&self, location: Key, domain: Key, peer_id: &PeerId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&(location, domain)) {
            Some(slot) => {
                Self::purge(slot, self.ttl);
                slot.contains_key(peer_id)
            }
            None => false,
        }
    }

    pub fn size(&self, location: Key, domain: Key) -> usize {
        let mut entries = self.entries.lock();
        match entries.get_mut(&(location, domain)) {
            Some(slot) => {
                Self::purge(slot, self.ttl);
                slot.len()
            }
            None => 0,
        }
    }

    fn purge(slot: &mut HashMap<PeerId, TrackerEntry>, ttl: Duration) {
        slot.retain(|_, entry| entry.stored_at.elapsed() < ttl);
    }
}
