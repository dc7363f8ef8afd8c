//! rkad - Kademlia DHT transport core
//!
//! This library implements the transport layer of a Kademlia-style DHT
//! node: request/response messaging over UDP and TCP that keeps working
//! behind NATs and firewalls, via relays, reverse connections and UDP hole
//! punching.
//!
//! # Modules
//!
//! - [`peer`] - 160-bit peer identifiers and immutable peer descriptors
//! - [`message`] - Wire message model, datagram and stream framing
//! - [`transport`] - Strategy selection, channel pool, NAT-piercing
//!   orchestrators, reply correlation, idle watchdogs
//! - [`tracker`] - TTL'd tracker storage and serializable Bloom filter for
//!   the layers above the transport
//!
//! # Sending a request
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rkad::message::{Command, Message};
//! use rkad::peer::{PeerAddress, PeerId};
//! use rkad::transport::{
//!     ChannelPool, Dispatcher, Endpoint, PendingRegistry, RconCache,
//!     ResponseCompletion, Sender, StatusListeners, TransportConfig, UdpPinger,
//! };
//!
//! # async fn example() -> Result<(), rkad::transport::TransportError> {
//! let local = PeerAddress::localhost(PeerId::random(), 2424, 2424);
//! let config = TransportConfig::default();
//!
//! let registry = Arc::new(PendingRegistry::new());
//! let cached = Arc::new(RconCache::new(config.rcon_cache_capacity));
//! let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&cached)));
//! let endpoint = Endpoint::bind(local, dispatcher).await?;
//!
//! let pinger = Arc::new(UdpPinger::new(endpoint.local().clone(), Duration::from_secs(2)));
//! let sender = Arc::new(Sender::new(
//!     endpoint.local().clone(),
//!     config.clone(),
//!     registry,
//!     cached,
//!     Arc::new(StatusListeners::new()),
//!     pinger,
//! ));
//! let pool = Arc::new(ChannelPool::new(&config));
//!
//! let recipient = PeerAddress::localhost(PeerId::random(), 8088, 8088);
//! let request = Message::request(Command::Ping, endpoint.local().clone(), recipient);
//! let completion = ResponseCompletion::new(request);
//! sender.send_tcp(&completion, &pool, config.idle_tcp, config.connect_timeout, None, false);
//! let outcome = completion.outcome().await;
//! println!("outcome: {:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod message;
pub mod peer;
pub mod tracker;
pub mod transport;

pub use message::{codec, CodecError, Command, Message, MessageType, SignatureFactory};
pub use peer::{Key, PeerAddress, PeerId, PeerSocketAddress};
pub use tracker::{BloomFilter, TrackerEntry, TrackerStorage};
pub use transport::{
    ChannelPool, DispatchAction, Dispatcher, Endpoint, Outcome, PeerConnection,
    PeerStatusListener, PendingRegistry, PingFactory, RconCache, RequestHandler,
    ResponseCompletion, Sender, StatusListeners, StrategyVerdict, TransportConfig,
    TransportError, UdpPinger, Watchdog,
};
