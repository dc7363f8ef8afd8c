//! Protocol constants and tuning parameters.
//!
//! Timeouts follow the defaults of the TomP2P family of DHT nodes; pool
//! sizes are sized for a single node handling a few hundred concurrent
//! requests.

use std::time::Duration;

// ============================================================================
// Wire protocol
// ============================================================================

/// Wire protocol version written into every frame header.
pub const WIRE_VERSION: u8 = 1;

/// Maximum accepted frame size (header + payload) in bytes.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Length of the TCP frame length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle timeout for TCP channels awaiting a reply.
pub const IDLE_TCP: Duration = Duration::from_secs(5);

/// Idle timeout for UDP channels awaiting a reply.
pub const IDLE_UDP: Duration = Duration::from_secs(2);

/// Interval between keep-alive pings on a long-lived peer connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// Channel pool
// ============================================================================

/// Maximum concurrently open outbound TCP channels.
pub const MAX_TCP_CHANNELS: usize = 100;

/// Maximum concurrently open outbound UDP channels.
pub const MAX_UDP_CHANNELS: usize = 100;

// ============================================================================
// NAT traversal
// ============================================================================

/// Number of candidate local UDP ports offered in a hole-punch hint.
pub const HOLE_PUNCH_PORTS: usize = 3;

/// Capacity of the reverse-connection request cache (LRU evicted).
pub const RCON_CACHE_CAPACITY: usize = 1024;

/// Lower bound of the ephemeral port range used for hole-punch candidates.
pub const EPHEMERAL_PORT_MIN: u16 = 49152;
