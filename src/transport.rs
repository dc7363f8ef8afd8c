//! The transport core: strategy selection, channel management, NAT piercing.
//!
//! Given a prepared [`Message`](crate::message::Message) and the recipient's
//! descriptor, the [`Sender`] picks one of four delivery strategies
//! (direct, reverse connection (RCON), relay, or UDP hole punch), opens the
//! needed channel(s), writes the frame, and correlates the reply (if any)
//! back to the caller's [`ResponseCompletion`].
//!
//! # Pieces
//!
//! - [`Sender`] - outbound entry points `send_tcp` / `send_udp` and the
//!   per-strategy orchestrators
//! - [`Endpoint`] - the inbound half: TCP listener and UDP socket feeding
//!   the [`Dispatcher`]
//! - [`PendingRegistry`] - correlates inbound replies to outstanding
//!   requests by message id
//! - [`ChannelPool`] - bounded slots for outbound channels
//! - [`Watchdog`] - per-channel idle detection
//! - [`PeerConnection`] - long-lived TCP channel with heartbeat
//!
//! # Outcome discipline
//!
//! Every request is represented by a `ResponseCompletion`: a
//! single-assignment slot that transitions pending → `Ok` / `Failed` /
//! `Cancelled` exactly once. Registry entries are evicted before user
//! listeners observe the outcome, and channel slots are released before the
//! completion resolves, so a caller can immediately issue a follow-up send.

mod channel;
mod completion;
mod config;
mod connection;
mod dispatch;
mod endpoint;
mod error;
mod holepunch;
mod registry;
mod sender;
mod status;
mod strategy;
mod watchdog;

pub use channel::ChannelPool;
pub use completion::{Outcome, ResponseCompletion};
pub use config::TransportConfig;
pub use connection::PeerConnection;
pub use dispatch::{DispatchAction, Dispatcher, RequestHandler};
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use registry::{PendingRegistry, RconCache};
pub use sender::{PingFactory, Sender, UdpPinger};
pub use status::{PeerStatusListener, StatusListeners};
pub use strategy::{select_strategy, tcp_strategy, udp_strategy, StrategyVerdict};
pub use watchdog::Watchdog;

#[cfg(test)]
mod tests;
