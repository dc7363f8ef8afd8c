use std::time::Duration;

use crate::constants;

/// Tuning knobs for the transport core.
///
/// `Default` mirrors the constants in [`crate::constants`]; tests shrink
/// the timeouts.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Idle budget for TCP channels awaiting a reply.
    pub idle_tcp: Duration,
    /// Idle budget for UDP channels awaiting a reply.
    pub idle_udp: Duration,
    /// Keep-alive interval on long-lived peer connections.
    pub heartbeat_interval: Duration,
    /// Outbound TCP channel slots.
    pub max_tcp_channels: usize,
    /// Outbound UDP channel slots.
    pub max_udp_channels: usize,
    /// Candidate local ports offered in a hole-punch hint.
    pub hole_punch_ports: usize,
    /// Capacity of the reverse-connection request cache.
    pub rcon_cache_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: constants::CONNECT_TIMEOUT,
            idle_tcp: constants::IDLE_TCP,
            idle_udp: constants::IDLE_UDP,
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            max_tcp_channels: constants::MAX_TCP_CHANNELS,
            max_udp_channels: constants::MAX_UDP_CHANNELS,
            hole_punch_ports: constants::HOLE_PUNCH_PORTS,
            rcon_cache_capacity: constants::RCON_CACHE_CAPACITY,
        }
    }
}
