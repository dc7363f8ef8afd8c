//! Wire message model and framing.
//!
//! Every exchange between peers is a [`Message`]: a fixed header (version,
//! message id, command, kind, flags), the sender and recipient descriptors,
//! and optional sections: an integer list (ports for NAT traversal), raw
//! buffers, a data map keyed by 160-bit keys, and a detached signature.
//!
//! The same logical grammar is framed two ways:
//!
//! - **UDP**: one message per datagram ([`codec::decode`]).
//! - **TCP**: a `u32` big-endian length prefix per message, with inbound
//!   bytes cumulated in a [`StreamDecoder`] until a full frame is available.
//!
//! Signatures are produced and checked by an externally supplied
//! [`SignatureFactory`]; the codec only carries the bytes.

pub mod codec;
mod error;
mod types;

pub use codec::StreamDecoder;
pub use error::CodecError;
pub use types::{Command, Message, MessageType};

use bytes::Bytes;

/// Produces and verifies detached message signatures.
///
/// The signed data is every serialized byte of the frame before the
/// signature section, so a verifier can re-feed the raw frame prefix.
pub trait SignatureFactory: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<Bytes, CodecError>;
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}
