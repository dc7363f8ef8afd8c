use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::error::TransportError;
use crate::peer::PeerAddress;

/// Observer for peers that stopped answering.
///
/// The routing table registers one of these and demotes a peer when its
/// sends fail at the transport level.
pub trait PeerStatusListener: Send + Sync {
    fn peer_failed(&self, peer: &PeerAddress, reason: &TransportError);
}

/// Registered peer-status listeners.
///
/// Notifications fire only for non-relayed recipients and only for
/// transport-level failures; a relayed peer's unreachability says more
/// about its relay than about the peer.
pub struct StatusListeners {
    listeners: RwLock<Vec<Arc<dyn PeerStatusListener>>>,
}

impl StatusListeners {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: Arc<dyn PeerStatusListener>) {
        self.listeners.write().push(listener);
    }

    pub fn unregister(&self, listener: &Arc<dyn PeerStatusListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn notify_failure(&self, peer: &PeerAddress, reason: &TransportError) {
        if peer.relayed || !reason.is_peer_failure() {
            return;
        }
        debug!(%peer, %reason, "reporting peer failure");
        for listener in self.listeners.read().iter() {
            listener.peer_failed(peer, reason);
        }
    }
}

impl Default for StatusListeners {
    fn default() -> Self {
        Self::new()
    }
}
