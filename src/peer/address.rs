use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::PeerId;

/// One socket a peer can be reached at: an IP plus separate TCP/UDP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerSocketAddress {
    pub addr: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl PeerSocketAddress {
    pub fn new(addr: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self {
            addr,
            tcp_port,
            udp_port,
        }
    }

    pub fn tcp(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.tcp_port)
    }

    pub fn udp(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.udp_port)
    }
}

impl fmt::Display for PeerSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.addr, self.tcp_port, self.udp_port)
    }
}

/// Full descriptor of a peer: identity, primary socket, NAT flags and relays.
///
/// A `relayed` peer cannot be dialed directly; traffic goes through one of
/// its `relays`. The firewalled flags describe per-protocol reachability and
/// drive the send-strategy selection.
///
/// The type is immutable in spirit: every `with_*` builder returns a
/// modified clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub id: PeerId,
    pub addr: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub firewalled_tcp: bool,
    pub firewalled_udp: bool,
    pub relayed: bool,
    pub relays: Vec<PeerSocketAddress>,
}

impl PeerAddress {
    pub fn new(id: PeerId, addr: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self {
            id,
            addr,
            tcp_port,
            udp_port,
            firewalled_tcp: false,
            firewalled_udp: false,
            relayed: false,
            relays: Vec::new(),
        }
    }

    /// A loopback address, handy for tests and single-host setups.
    pub fn localhost(id: PeerId, tcp_port: u16, udp_port: u16) -> Self {
        Self::new(id, IpAddr::V4(Ipv4Addr::LOCALHOST), tcp_port, udp_port)
    }

    pub fn socket(&self) -> PeerSocketAddress {
        PeerSocketAddress::new(self.addr, self.tcp_port, self.udp_port)
    }

    pub fn tcp_socket(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.tcp_port)
    }

    pub fn udp_socket(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.udp_port)
    }

    pub fn with_addr(&self, addr: IpAddr) -> Self {
        let mut p = self.clone();
        p.addr = addr;
        p
    }

    pub fn with_ports(&self, tcp_port: u16, udp_port: u16) -> Self {
        let mut p = self.clone();
        p.tcp_port = tcp_port;
        p.udp_port = udp_port;
        p
    }

    /// Overwrites address and both ports from `socket` in one step.
    pub fn with_socket(&self, socket: PeerSocketAddress) -> Self {
        let mut p = self.clone();
        p.addr = socket.addr;
        p.tcp_port = socket.tcp_port;
        p.udp_port = socket.udp_port;
        p
    }

    pub fn with_firewalled_tcp(&self, firewalled: bool) -> Self {
        let mut p = self.clone();
        p.firewalled_tcp = firewalled;
        p
    }

    pub fn with_firewalled_udp(&self, firewalled: bool) -> Self {
        let mut p = self.clone();
        p.firewalled_udp = firewalled;
        p
    }

    pub fn with_relayed(&self, relayed: bool) -> Self {
        let mut p = self.clone();
        p.relayed = relayed;
        p
    }

    pub fn with_relays(&self, relays: Vec<PeerSocketAddress>) -> Self {
        let mut p = self.clone();
        p.relays = relays;
        p
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}{}",
            self.id,
            self.addr,
            self.tcp_port,
            self.udp_port,
            if self.relayed { " (relayed)" } else { "" }
        )
    }
}
