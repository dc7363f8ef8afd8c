//! Peer identifiers and addressing.
//!
//! A peer is identified by a 160-bit [`PeerId`] and reachable through a
//! [`PeerAddress`]: a primary socket (one IP, separate TCP and UDP ports),
//! NAT flags, and, for peers behind NATs, a list of relay sockets
//! ([`PeerSocketAddress`]) that forward traffic on their behalf.
//!
//! Addresses are value types: mutation goes through copy-with builders
//! (`with_ports`, `with_relayed`, ...) that return a modified clone, so a
//! descriptor captured by an in-flight send is never changed underneath it.

mod address;
mod id;

pub use address::{PeerAddress, PeerSocketAddress};
pub use id::{Key, PeerId};

#[cfg(test)]
mod tests;
