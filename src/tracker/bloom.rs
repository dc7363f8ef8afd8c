use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::peer::PeerId;

/// A serializable Bloom filter over 160-bit ids.
///
/// Double hashing over a single SHA-1 of the key: index_i = h1 + i * h2
/// (mod m). False positives are possible, false negatives are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    m: u32,
    k: u32,
}

impl BloomFilter {
    /// Creates a filter with `bits` bits sized for `expected_items` keys.
    pub fn new(bits: usize, expected_items: usize) -> Self {
        let m = bits.max(8) as u32;
        // k = (m/n) ln 2, clamped to something sane.
        let k = if expected_items == 0 {
            1
        } else {
            let optimal = (m as f64 / expected_items as f64) * std::f64::consts::LN_2;
            (optimal.round() as u32).clamp(1, 16)
        };
        Self {
            bits: vec![0u8; m.div_ceil(8) as usize],
            m,
            k,
        }
    }

    pub fn insert(&mut self, key: &PeerId) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.k {
            let idx = Self::index(h1, h2, i, self.m);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    pub fn contains(&self, key: &PeerId) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..self.k).all(|i| {
            let idx = Self::index(h1, h2, i, self.m);
            self.bits[(idx / 8) as usize] & (1 << (idx % 8)) != 0
        })
    }

    /// Serializes the filter for transport inside a message buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.bits.len());
        buf.put_u32(self.m);
        buf.put_u32(self.k);
        buf.put_slice(&self.bits);
        buf.freeze()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut buf = data;
        if buf.len() < 8 {
            return None;
        }
        let m = buf.get_u32();
        let k = buf.get_u32();
        if k == 0 || buf.len() != m.div_ceil(8) as usize {
            return None;
        }
        Some(Self {
            bits: buf.to_vec(),
            m,
            k,
        })
    }

    fn hash_pair(key: &PeerId) -> (u64, u64) {
        let digest = Sha1::digest(key.as_bytes());
        let h1 = u64::from_be_bytes(digest[0..8].try_into().unwrap_or([0u8; 8]));
        let h2 = u64::from_be_bytes(digest[8..16].try_into().unwrap_or([0u8; 8]));
        (h1, h2 | 1)
    }

    fn index(h1: u64, h2: u64, i: u32, m: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m as u64) as u32
    }
}
