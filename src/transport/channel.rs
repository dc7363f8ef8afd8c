use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::debug;

use super::config::TransportConfig;
use super::error::TransportError;
use crate::constants::EPHEMERAL_PORT_MIN;

/// Borrowed channel slot; dropping it returns the slot to the pool.
///
/// Send paths drop the permit (and the socket with it) before resolving
/// their completion, so a listener can immediately reuse the slot.
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    pub fn release(self) {}
}

/// An outbound TCP channel borrowed from the pool.
pub struct TcpSlot {
    pub stream: TcpStream,
    pub permit: SlotPermit,
}

/// An outbound UDP channel borrowed from the pool.
pub struct UdpSlot {
    pub socket: UdpSocket,
    pub permit: SlotPermit,
}

/// Bounded factory for outbound channels.
///
/// One permit per open channel, separate budgets for TCP and UDP. Slot
/// exhaustion is a `ChannelCreation` failure: fatal for the attempt,
/// retryable by the caller.
pub struct ChannelPool {
    tcp_slots: Arc<Semaphore>,
    udp_slots: Arc<Semaphore>,
    shutdown: AtomicBool,
}

impl ChannelPool {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            tcp_slots: Arc::new(Semaphore::new(config.max_tcp_channels)),
            udp_slots: Arc::new(Semaphore::new(config.max_udp_channels)),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Connects a TCP channel within `connect_timeout`.
    pub async fn connect_tcp(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<TcpSlot, TransportError> {
        let permit = self.acquire(&self.tcp_slots, "tcp")?;
        debug!(%addr, "connecting tcp channel");
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(TcpSlot {
                stream,
                permit: SlotPermit { _permit: permit },
            }),
            Ok(Err(e)) => Err(TransportError::Connect(format!("{}: {}", addr, e))),
            Err(_) => Err(TransportError::Connect(format!("{}: connect timeout", addr))),
        }
    }

    /// Binds a UDP channel, optionally to a specific local port (hole
    /// punching needs predictable source ports).
    pub async fn bind_udp(&self, local_port: Option<u16>) -> Result<UdpSlot, TransportError> {
        let permit = self.acquire(&self.udp_slots, "udp")?;
        let bind_addr = format!("0.0.0.0:{}", local_port.unwrap_or(0));
        match UdpSocket::bind(&bind_addr).await {
            Ok(socket) => Ok(UdpSlot {
                socket,
                permit: SlotPermit { _permit: permit },
            }),
            Err(e) => Err(TransportError::ChannelCreation(format!(
                "udp bind {}: {}",
                bind_addr, e
            ))),
        }
    }

    /// A candidate local port for hole-punch hints.
    pub fn random_port(&self) -> u16 {
        rand::rng().random_range(EPHEMERAL_PORT_MIN..u16::MAX)
    }

    /// Refuses new channels; in-flight sends are failed through the
    /// registry by the caller.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn acquire(
        &self,
        slots: &Arc<Semaphore>,
        kind: &str,
    ) -> Result<OwnedSemaphorePermit, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }
        Arc::clone(slots).try_acquire_owned().map_err(|_| {
            TransportError::ChannelCreation(format!("{} channel slots exhausted", kind))
        })
    }
}
