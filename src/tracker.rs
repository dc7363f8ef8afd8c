//! Minimal tracker storage and Bloom filter.
//!
//! Peers announce themselves under a `(location, domain)` key pair; entries
//! expire after a TTL and are purged on access. Readers can pass a
//! [`BloomFilter`] of peer ids they already know to get only the rest;
//! the filter travels inside a message buffer, so it is serializable.
//!
//! This is collaborator-grade storage for the DHT layers above the
//! transport, not a full tracker engine.

mod bloom;
mod storage;

pub use bloom::BloomFilter;
pub use storage::{TrackerEntry, TrackerStorage};
